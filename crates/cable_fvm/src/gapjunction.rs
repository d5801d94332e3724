//! Gap-junction resolution: the `(gid, lid) → global CV` index map published
//! by every domain, and the per-cell junction records assembled from it.
//!
//! Global CV indices are group CV indices shifted by prefix-summed per-group
//! CV counts, so the map is identical on every rank after the all-gather.

use crate::discretization::CvDiscretization;
use crate::geometry::CvPrefer;
use crate::LayoutError;
use cable_cell::CableCell;
use cable_core::{CellGid, CellMember};
use std::collections::BTreeMap;

/// One published map entry: a junction site and its global CV index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GjCvMapEntry {
    pub site: CellMember,
    pub global_cv: u32,
}

/// A resolved gap-junction connection on a cell: CV indices are global.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FvmGapJunction {
    pub local_lid: u32,
    pub local_cv: u32,
    pub peer_cv: u32,
    pub weight: f64,
}

/// A gap-junction connection as described by the recipe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapJunctionConn {
    pub local_lid: u32,
    pub peer: CellMember,
    pub weight: f64,
}

/// Collect this group's `(gid, lid) → global CV` entries. `cv_offset` is the
/// group's first global CV index.
pub fn gap_junction_cv_map(
    cells: &[CableCell],
    gids: &[CellGid],
    d: &CvDiscretization,
    cv_offset: u32,
) -> Vec<GjCvMapEntry> {
    let mut entries = Vec::new();
    for (cell_idx, cell) in cells.iter().enumerate() {
        for placements in cell.assignments().junctions.values() {
            for placed in placements {
                let cv = d
                    .geometry
                    .location_cv(cell_idx, placed.loc, CvPrefer::Nonempty);
                entries.push(GjCvMapEntry {
                    site: CellMember {
                        gid: gids[cell_idx],
                        lid: cable_core::CellLid(placed.lid),
                    },
                    global_cv: cv + cv_offset,
                });
            }
        }
    }
    entries
}

/// Resolve the recipe's gap-junction connections for the given gids against
/// the gathered global site map. Results are keyed by gid and sorted by
/// local CV.
pub fn resolve_gap_junctions(
    gids: &[CellGid],
    conns_by_gid: &BTreeMap<CellGid, Vec<GapJunctionConn>>,
    global_map: &[GjCvMapEntry],
) -> Result<BTreeMap<CellGid, Vec<FvmGapJunction>>, LayoutError> {
    let index: BTreeMap<CellMember, u32> = global_map
        .iter()
        .map(|e| (e.site, e.global_cv))
        .collect();

    let lookup = |site: CellMember| {
        index
            .get(&site)
            .copied()
            .ok_or(LayoutError::BadGapJunction {
                gid: site.gid.0,
                lid: site.lid.0,
            })
    };

    let mut resolved = BTreeMap::new();
    for &gid in gids {
        let mut local: Vec<FvmGapJunction> = Vec::new();
        if let Some(conns) = conns_by_gid.get(&gid) {
            for conn in conns {
                let local_cv = lookup(CellMember {
                    gid,
                    lid: cable_core::CellLid(conn.local_lid),
                })?;
                let peer_cv = lookup(conn.peer)?;
                local.push(FvmGapJunction {
                    local_lid: conn.local_lid,
                    local_cv,
                    peer_cv,
                    weight: conn.weight,
                });
            }
        }
        local.sort_by(|a, b| {
            (a.local_cv, a.peer_cv)
                .partial_cmp(&(b.local_cv, b.peer_cv))
                .unwrap()
        });
        resolved.insert(gid, local);
    }
    Ok(resolved)
}
