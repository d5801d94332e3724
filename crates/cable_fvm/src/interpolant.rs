//! Voltage and axial-current interpolants: linear combinations of CV
//! voltages reconstructing the membrane voltage (or axial current) at an
//! arbitrary morphology location.
//!
//! A voltage reference is a CV plus a location where its voltage is deemed
//! exact: the centre (by length) for CVs without fork points, otherwise the
//! fork location. When the site lies between fork points inside one CV the
//! references collapse and the coefficients degenerate to (1, 0).

use crate::clip_pw;
use crate::discretization::CvDiscretization;
use crate::geometry::{CvGeometry, CvPrefer};
use cable_cell::CableCell;
use cable_core::NO_PARENT;
use cable_morph::{Cable, Location, Morphology};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageInterpolant {
    pub proximal_cv: u32,
    pub distal_cv: u32,
    pub proximal_coef: f64,
    pub distal_coef: f64,
}

#[derive(Debug, Clone, Copy)]
struct VoltageReference {
    cv: i64,
    loc: Location,
}

impl VoltageReference {
    fn none() -> Self {
        Self {
            cv: -1,
            loc: Location::new(0, 0.0),
        }
    }
}

/// Locations coincident with `x` under projection onto the tree: the other
/// names of a fork point.
fn coincident_locations(m: &Morphology, x: Location) -> Vec<Location> {
    let mut result = Vec::new();
    if x.pos == 0.0 {
        if let Some(parent) = m.branch_parent(x.branch as usize) {
            result.push(Location::new(parent as u32, 1.0));
            for &sibling in m.branch_children(parent) {
                if sibling as u32 != x.branch {
                    result.push(Location::new(sibling as u32, 0.0));
                }
            }
        }
    } else if x.pos == 1.0 {
        for &child in m.branch_children(x.branch as usize) {
            result.push(Location::new(child as u32, 0.0));
        }
    }
    result
}

fn cables_intersect_location(cables: &[Cable], x: Location) -> bool {
    cables.iter().any(|c| c.contains(x))
}

fn voltage_reference_points(
    m: &Morphology,
    geom: &CvGeometry,
    cell_idx: usize,
    site: Location,
) -> (VoltageReference, VoltageReference) {
    let bid = site.branch;
    let mut check_parent = true;
    let mut check_child = true;

    let cv_simple = |cv: usize| geom.cables(cv).len() == 1;
    let cv_midpoint = |cv: usize| {
        let c = geom.cables(cv)[0];
        Location::new(c.branch, 0.5 * (c.prox_pos + c.dist_pos))
    };
    let cv_contains_fork = |cv: usize, x: Location| {
        if cv_simple(cv) {
            return false;
        }
        coincident_locations(m, x)
            .into_iter()
            .any(|y| cables_intersect_location(geom.cables(cv), y))
    };

    let mut site_ref = VoltageReference::none();
    let mut parent_ref = VoltageReference::none();
    let mut child_ref = VoltageReference::none();

    site_ref.cv = i64::from(geom.location_cv(cell_idx, site, CvPrefer::Empty));
    let site_cv = site_ref.cv as usize;
    if cv_simple(site_cv) {
        site_ref.loc = cv_midpoint(site_cv);
    } else if cv_contains_fork(site_cv, Location::new(bid, 0.0)) {
        site_ref.loc = Location::new(bid, 0.0);
        check_parent = false;
    } else {
        // Not simple and without the branch head as a fork point: the branch
        // tail must be the fork.
        site_ref.loc = Location::new(bid, 1.0);
        check_child = false;
    }

    if check_parent {
        let p = geom.cv_parent[site_cv];
        if p != NO_PARENT {
            parent_ref.cv = i64::from(p);
            parent_ref.loc = if cv_simple(p as usize) {
                cv_midpoint(p as usize)
            } else {
                Location::new(bid, 0.0)
            };
        }
    }

    if check_child {
        for &child_cv in geom.children(site_cv) {
            let child_prox_cable = geom.cables(child_cv as usize)[0];
            if child_prox_cable.branch == bid {
                child_ref.cv = i64::from(child_cv);
                child_ref.loc = if cv_simple(child_cv as usize) {
                    cv_midpoint(child_cv as usize)
                } else {
                    Location::new(bid, 1.0)
                };
                break;
            }
        }
    }

    // With both parent and child available, pick by distality of the site
    // with respect to the site reference.
    if child_ref.cv != -1 && parent_ref.cv != -1 {
        if site.pos < site_ref.loc.pos {
            child_ref.cv = -1;
        } else {
            parent_ref.cv = -1;
        }
    }

    if child_ref.cv != -1 {
        (site_ref, child_ref)
    } else if parent_ref.cv != -1 {
        (parent_ref, site_ref)
    } else {
        (site_ref, site_ref)
    }
}

fn span_resistance(d: &CvDiscretization, cell_idx: usize, span: Cable, cell: &CableCell) -> f64 {
    let pw = clip_pw(
        &d.axial_resistivity[cell_idx][span.branch as usize],
        span.prox_pos,
        span.dist_pos,
    );
    cell.embedding().integrate_ixa_pw(span.branch, &pw)
}

/// Interpolation coefficients reconstructing membrane voltage at `site`.
/// Coefficients sum to one; the mix is the ratio of axial resistances from
/// the proximal reference to the site and between the two references.
pub fn interpolate_voltage(
    cell: &CableCell,
    d: &CvDiscretization,
    cell_idx: usize,
    site: Location,
) -> VoltageInterpolant {
    let (prox, dist) = voltage_reference_points(cell.morphology(), &d.geometry, cell_idx, site);

    if prox.cv == dist.cv {
        return VoltageInterpolant {
            proximal_cv: prox.cv as u32,
            distal_cv: dist.cv as u32,
            proximal_coef: 1.0,
            distal_coef: 0.0,
        };
    }

    let bid = site.branch;
    let rr_span = Cable::new(bid, prox.loc.pos, dist.loc.pos);
    let rr_resistance = span_resistance(d, cell_idx, rr_span, cell);

    // The site may be proximal to the proximal reference point.
    let flip_rs = prox.loc.pos > site.pos;
    let rs_span = if flip_rs {
        Cable::new(bid, site.pos, prox.loc.pos)
    } else {
        Cable::new(bid, prox.loc.pos, site.pos)
    };
    let mut rs_resistance = span_resistance(d, cell_idx, rs_span, cell);
    if flip_rs {
        rs_resistance = -rs_resistance;
    }

    let p = rs_resistance / rr_resistance;
    VoltageInterpolant {
        proximal_cv: prox.cv as u32,
        distal_cv: dist.cv as u32,
        proximal_coef: 1.0 - p,
        distal_coef: p,
    }
}

/// Axial current at `site` as a linear combination of the two reference
/// voltages: ± the conductance of the span between them, in µS (current in
/// nA when applied to mV).
pub fn axial_current(
    cell: &CableCell,
    d: &CvDiscretization,
    cell_idx: usize,
    site: Location,
) -> VoltageInterpolant {
    let (prox, dist) = voltage_reference_points(cell.morphology(), &d.geometry, cell_idx, site);

    if prox.cv == dist.cv {
        return VoltageInterpolant {
            proximal_cv: prox.cv as u32,
            distal_cv: dist.cv as u32,
            proximal_coef: 0.0,
            distal_coef: 0.0,
        };
    }

    let bid = site.branch;
    let rr_span = Cable::new(bid, prox.loc.pos, dist.loc.pos);
    let rr_conductance = 100.0 / span_resistance(d, cell_idx, rr_span, cell);

    VoltageInterpolant {
        proximal_cv: prox.cv as u32,
        distal_cv: dist.cv as u32,
        proximal_coef: rr_conductance,
        distal_coef: -rr_conductance,
    }
}
