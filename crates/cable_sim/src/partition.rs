//! Domain decomposition: distribute cells over ranks keeping gap-junction
//! supercells intact, and derive the per-group integration domains.

use crate::{Recipe, SimulationError};
use cable_comm::Distributed;
use cable_core::{CellGid, CellKind};

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn join(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// The placement of every cell: owning rank per gid, plus this rank's gids
/// in simulation order.
#[derive(Debug, Clone)]
pub struct DomainDecomposition {
    pub gid_domain: Vec<u32>,
    pub local_gids: Vec<CellGid>,
}

/// Assign gap-junction supercells to ranks in contiguous blocks of roughly
/// equal cell count. Deterministic across ranks.
pub fn partition_load_balance(
    rec: &dyn Recipe,
    dist: &dyn Distributed,
) -> Result<DomainDecomposition, SimulationError> {
    let n = rec.num_cells() as usize;
    let num_domains = dist.size();

    // Supercells: connected components under the symmetric gj relation.
    let mut sets = UnionFind::new(n);
    for gid in 0..n {
        for conn in rec.gap_junctions_on(CellGid(gid as u32)) {
            let peer = conn.peer.gid.0 as usize;
            if peer < n {
                sets.join(gid, peer);
            }
        }
    }

    // Components keyed by their smallest gid, in gid order.
    let mut component_of = vec![usize::MAX; n];
    let mut components: Vec<Vec<u32>> = Vec::new();
    for gid in 0..n {
        let root = sets.find(gid);
        if component_of[root] == usize::MAX {
            component_of[root] = components.len();
            components.push(Vec::new());
        }
        components[component_of[root]].push(gid as u32);
    }

    // Contiguous blocks of components, balanced by cell count.
    let mut gid_domain = vec![0u32; n];
    let per_domain = (n as f64 / num_domains as f64).ceil() as usize;
    let mut domain = 0usize;
    let mut assigned_here = 0usize;
    for comp in &components {
        if assigned_here >= per_domain && domain + 1 < num_domains {
            domain += 1;
            assigned_here = 0;
        }
        for &gid in comp {
            gid_domain[gid as usize] = domain as u32;
        }
        assigned_here += comp.len();
    }

    let rank = dist.rank() as u32;
    let local_gids: Vec<CellGid> = (0..n as u32)
        .filter(|&g| gid_domain[g as usize] == rank)
        .map(CellGid)
        .collect();

    for &gid in &local_gids {
        let kind = rec.cell_kind(gid);
        if kind != CellKind::Cable {
            return Err(SimulationError::UnsupportedCellKind { gid: gid.0, kind });
        }
    }

    log::debug!(
        "rank {rank}: {} of {} cells over {} domains",
        local_gids.len(),
        n,
        num_domains
    );
    Ok(DomainDecomposition {
        gid_domain,
        local_gids,
    })
}

/// Integration domains over a rank's cells: gap-junction-connected cells
/// share one timestep. Returns `(cell_to_intdom, n_intdom)`.
pub(crate) fn local_intdoms(rec: &dyn Recipe, gids: &[CellGid]) -> (Vec<u32>, usize) {
    let index_of = |gid: CellGid| gids.iter().position(|&g| g == gid);
    let mut sets = UnionFind::new(gids.len());
    for (i, &gid) in gids.iter().enumerate() {
        for conn in rec.gap_junctions_on(gid) {
            if let Some(j) = index_of(conn.peer.gid) {
                sets.join(i, j);
            }
        }
    }
    let mut intdom_of_root = vec![usize::MAX; gids.len()];
    let mut cell_to_intdom = vec![0u32; gids.len()];
    let mut next = 0usize;
    for i in 0..gids.len() {
        let root = sets.find(i);
        if intdom_of_root[root] == usize::MAX {
            intdom_of_root[root] = next;
            next += 1;
        }
        cell_to_intdom[i] = intdom_of_root[root] as u32;
    }
    (cell_to_intdom, next)
}
