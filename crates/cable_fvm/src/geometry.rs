//! Control-volume geometry: the partition of a cell into CVs induced by a
//! set of boundary locations, with the parent/children tree over CVs and
//! the per-branch location → CV query map.

use cable_cell::CableCell;
use cable_core::NO_PARENT;
use cable_morph::{Cable, Location};

/// Disambiguation rule for locations that fall on a CV boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvPrefer {
    /// Take the distal CV.
    Distal,
    /// Take the proximal CV when the location sits on its proximal edge.
    Proximal,
    /// Prefer an adjacent CV of positive extent over a zero-extent one.
    Nonempty,
    /// Prefer an adjacent zero-extent CV.
    Empty,
}

/// CV geometry of one or more concatenated cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvGeometry {
    /// Parent CV per CV, `NO_PARENT` at cell roots; parents precede children.
    pub cv_parent: Vec<i32>,
    pub cv_children: Vec<u32>,
    pub cv_children_divs: Vec<u32>,
    pub cv_cables: Vec<Cable>,
    pub cv_cables_divs: Vec<u32>,
    pub cv_to_cell: Vec<u32>,
    pub cell_cv_divs: Vec<u32>,
    // Per cell, per branch: (prox, dist, cell-local cv) in CV order.
    branch_cv_map: Vec<Vec<Vec<(f64, f64, u32)>>>,
}

// Union-find over discretization elements.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
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

    // Keep the smaller element index as representative so components are
    // identified by their most proximal element.
    fn join(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Element {
    /// Interval on a branch between consecutive boundary positions.
    Interval { branch: usize, lo: f64, hi: f64 },
    /// The fork point at the distal end of a branch.
    Fork { branch: usize },
    /// The junction of multiple root branches at the morphology root.
    RootFork { first_branch: usize },
}

impl CvGeometry {
    /// Build the geometry of a single cell cut at `boundaries` (sorted,
    /// deduplicated boundary locations from a CV policy).
    pub fn new(cell: &CableCell, boundaries: &[Location]) -> Self {
        let m = cell.morphology();
        let n_branch = m.num_branches();

        let mut bps: Vec<Vec<f64>> = vec![Vec::new(); n_branch];
        for loc in boundaries {
            if (loc.branch as usize) < n_branch {
                bps[loc.branch as usize].push(loc.pos);
            }
        }

        let root_branches: Vec<usize> = (0..n_branch)
            .filter(|&b| m.branch_parent(b).is_none())
            .collect();
        let has_root_fork = root_branches.len() > 1;

        // Enumerate elements in proximal-to-distal order: the root junction
        // first (if several root branches meet there), then per branch its
        // intervals followed by the fork at its distal end.
        let mut elements: Vec<Element> = Vec::new();
        let mut first_interval = vec![usize::MAX; n_branch];
        let mut last_interval = vec![usize::MAX; n_branch];
        let mut fork_of = vec![usize::MAX; n_branch];
        let mut root_fork = usize::MAX;
        let mut cut_at_0 = vec![false; n_branch];
        let mut cut_at_1 = vec![false; n_branch];

        if has_root_fork {
            root_fork = elements.len();
            elements.push(Element::RootFork {
                first_branch: root_branches[0],
            });
        }

        for b in 0..n_branch {
            let mut cuts = vec![0.0];
            for &p in &bps[b] {
                cuts.push(p.clamp(0.0, 1.0));
            }
            cuts.push(1.0);
            cuts.sort_by(|a, b| a.partial_cmp(b).unwrap());
            cuts.dedup();
            cut_at_0[b] = bps[b].iter().any(|&p| p <= 0.0);
            cut_at_1[b] = bps[b].iter().any(|&p| p >= 1.0);

            first_interval[b] = elements.len();
            for w in cuts.windows(2) {
                elements.push(Element::Interval {
                    branch: b,
                    lo: w[0],
                    hi: w[1],
                });
            }
            last_interval[b] = elements.len() - 1;
            if !m.branch_children(b).is_empty() {
                fork_of[b] = elements.len();
                elements.push(Element::Fork { branch: b });
            }
        }

        // Join elements that are not separated by a boundary.
        let mut sets = DisjointSet::new(elements.len());
        for b in 0..n_branch {
            match m.branch_parent(b) {
                Some(p) => {
                    if !cut_at_0[b] {
                        sets.join(first_interval[b], fork_of[p]);
                    }
                    if !cut_at_1[p] {
                        sets.join(last_interval[p], fork_of[p]);
                    }
                }
                None => {
                    if has_root_fork && !cut_at_0[b] {
                        sets.join(first_interval[b], root_fork);
                    }
                }
            }
        }

        // Components, ordered by their most proximal element.
        let mut roots: Vec<usize> = Vec::new();
        let mut cv_of_element = vec![usize::MAX; elements.len()];
        for i in 0..elements.len() {
            let r = sets.find(i);
            if r == i {
                cv_of_element[i] = roots.len();
                roots.push(i);
            }
        }
        for i in 0..elements.len() {
            let r = sets.find(i);
            cv_of_element[i] = cv_of_element[r];
        }

        let n_cv = roots.len();

        // Proximal neighbor element per element, for the CV parent relation.
        let prox_neighbor = |elem: usize| -> Option<usize> {
            match elements[elem] {
                Element::Interval { branch, lo, .. } => {
                    if elem != first_interval[branch] {
                        Some(elem - 1)
                    } else {
                        debug_assert!(lo == 0.0);
                        match m.branch_parent(branch) {
                            Some(p) => Some(fork_of[p]),
                            None if has_root_fork => Some(root_fork),
                            None => None,
                        }
                    }
                }
                Element::Fork { branch } => Some(last_interval[branch]),
                Element::RootFork { .. } => None,
            }
        };

        let mut cv_parent = vec![NO_PARENT; n_cv];
        for (cv, &root_elem) in roots.iter().enumerate() {
            if let Some(neighbor) = prox_neighbor(root_elem) {
                let p = cv_of_element[neighbor];
                if p != cv {
                    cv_parent[cv] = p as i32;
                }
            }
        }

        // Cables per CV: intervals contribute their spans; forks contribute
        // a zero-length cable only when isolated.
        let mut cables_per_cv: Vec<Vec<Cable>> = vec![Vec::new(); n_cv];
        for (i, elem) in elements.iter().enumerate() {
            let cv = cv_of_element[i];
            match *elem {
                Element::Interval { branch, lo, hi } => {
                    cables_per_cv[cv].push(Cable::new(branch as u32, lo, hi));
                }
                Element::Fork { branch } => {
                    if roots[cv] == i {
                        cables_per_cv[cv].push(Cable::new(branch as u32, 1.0, 1.0));
                    }
                }
                Element::RootFork { first_branch } => {
                    if roots[cv] == i {
                        cables_per_cv[cv].push(Cable::new(first_branch as u32, 0.0, 0.0));
                    }
                }
            }
        }
        for cables in &mut cables_per_cv {
            cables.sort_by(|a, b| {
                (a.branch, a.prox_pos)
                    .partial_cmp(&(b.branch, b.prox_pos))
                    .unwrap()
            });
        }

        let mut geom = CvGeometry {
            cv_parent,
            ..Default::default()
        };

        geom.cv_cables_divs.push(0);
        for cables in &cables_per_cv {
            geom.cv_cables.extend_from_slice(cables);
            geom.cv_cables_divs.push(geom.cv_cables.len() as u32);
        }

        geom.cv_children_divs.push(0);
        let mut children: Vec<Vec<u32>> = vec![Vec::new(); n_cv];
        for cv in 0..n_cv {
            if geom.cv_parent[cv] != NO_PARENT {
                children[geom.cv_parent[cv] as usize].push(cv as u32);
            }
        }
        for ch in &children {
            geom.cv_children.extend_from_slice(ch);
            geom.cv_children_divs.push(geom.cv_children.len() as u32);
        }

        geom.cv_to_cell = vec![0; n_cv];
        geom.cell_cv_divs = vec![0, n_cv as u32];

        // Location query map: CV order guarantees cables on a branch are
        // visited proximal to distal.
        let mut bmap: Vec<Vec<(f64, f64, u32)>> = vec![Vec::new(); n_branch];
        for cv in 0..n_cv {
            for cable in geom.cables(cv) {
                bmap[cable.branch as usize].push((cable.prox_pos, cable.dist_pos, cv as u32));
            }
        }
        for entries in &mut bmap {
            entries.sort_by(|a, b| (a.0, a.1).partial_cmp(&(b.0, b.1)).unwrap());
        }
        geom.branch_cv_map = vec![bmap];

        geom
    }

    pub fn size(&self) -> usize {
        self.cv_parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cv_parent.is_empty()
    }

    pub fn n_cell(&self) -> usize {
        self.cell_cv_divs.len().saturating_sub(1)
    }

    pub fn cables(&self, cv: usize) -> &[Cable] {
        let lo = self.cv_cables_divs[cv] as usize;
        let hi = self.cv_cables_divs[cv + 1] as usize;
        &self.cv_cables[lo..hi]
    }

    pub fn children(&self, cv: usize) -> &[u32] {
        let lo = self.cv_children_divs[cv] as usize;
        let hi = self.cv_children_divs[cv + 1] as usize;
        &self.cv_children[lo..hi]
    }

    /// The CV index range of one cell.
    pub fn cell_cvs(&self, cell_idx: usize) -> std::ops::Range<usize> {
        self.cell_cv_divs[cell_idx] as usize..self.cell_cv_divs[cell_idx + 1] as usize
    }

    /// Resolve a location to a CV index under the given boundary preference.
    pub fn location_cv(&self, cell_idx: usize, loc: Location, prefer: CvPrefer) -> u32 {
        let entries = &self.branch_cv_map[cell_idx][loc.branch as usize];
        debug_assert!(!entries.is_empty());

        let zero_extent = |j: usize| entries[j].0 == entries[j].1;
        let i_max = entries.len() - 1;

        // Rightmost entry whose proximal edge does not exceed the position.
        let mut i = entries.partition_point(|e| e.0 <= loc.pos);
        i = i.saturating_sub(1);

        match prefer {
            CvPrefer::Distal => {}
            CvPrefer::Proximal => {
                if loc.pos == entries[i].0 && i > 0 {
                    i -= 1;
                }
            }
            CvPrefer::Nonempty => {
                if zero_extent(i) {
                    if i > 0 && !zero_extent(i - 1) {
                        i -= 1;
                    } else if i < i_max && !zero_extent(i + 1) {
                        i += 1;
                    }
                }
            }
            CvPrefer::Empty => {
                if loc.pos == entries[i].0 && i > 0 && zero_extent(i - 1) {
                    i -= 1;
                }
            }
        }

        self.cell_cv_divs[cell_idx] + entries[i].2
    }

    /// Concatenate another cell's geometry, offsetting all indices.
    pub fn append(&mut self, right: &CvGeometry) {
        if right.n_cell() == 0 {
            return;
        }
        if self.n_cell() == 0 {
            *self = right.clone();
            return;
        }

        let cv_offset = self.size() as u32;
        let cell_offset = self.n_cell() as u32;

        for &p in &right.cv_parent {
            self.cv_parent
                .push(if p == NO_PARENT { p } else { p + cv_offset as i32 });
        }
        for &c in &right.cv_children {
            self.cv_children.push(c + cv_offset);
        }
        append_divs(&mut self.cv_children_divs, &right.cv_children_divs);

        self.cv_cables.extend_from_slice(&right.cv_cables);
        append_divs(&mut self.cv_cables_divs, &right.cv_cables_divs);

        for &c in &right.cv_to_cell {
            self.cv_to_cell.push(c + cell_offset);
        }
        append_divs(&mut self.cell_cv_divs, &right.cell_cv_divs);

        self.branch_cv_map
            .extend(right.branch_cv_map.iter().cloned());
    }
}

/// Append a division vector, continuing from the left's last offset.
pub(crate) fn append_divs(left: &mut Vec<u32>, right: &[u32]) {
    if left.is_empty() {
        left.extend_from_slice(right);
    } else if !right.is_empty() {
        let last = *left.last().unwrap();
        left.extend(right.iter().skip(1).map(|&x| x + last));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cable_cell::Decor;
    use cable_morph::{CvPolicy, Morphology, Point, PwlinEmbedding, SegmentTree};

    fn two_branch_cell() -> CableCell {
        let mut tree = SegmentTree::new();
        let s0 = tree
            .append(
                None,
                Point::new(0.0, 0.0, 0.0, 1.0),
                Point::new(100.0, 0.0, 0.0, 1.0),
                3,
            )
            .unwrap();
        tree.append(
            Some(s0),
            Point::new(100.0, 0.0, 0.0, 1.0),
            Point::new(200.0, 0.0, 0.0, 1.0),
            3,
        )
        .unwrap();
        tree.append(
            Some(s0),
            Point::new(100.0, 0.0, 0.0, 1.0),
            Point::new(100.0, 100.0, 0.0, 1.0),
            3,
        )
        .unwrap();
        let m = Morphology::try_from_tree(tree).unwrap();
        CableCell::new(m, Decor::new()).unwrap()
    }

    fn boundaries(cell: &CableCell, policy: &CvPolicy) -> Vec<Location> {
        let e = PwlinEmbedding::new(cell.morphology());
        policy.boundary_points(cell.morphology(), &e)
    }

    #[test]
    fn single_policy_gives_one_cv() {
        let cell = two_branch_cell();
        let geom = CvGeometry::new(&cell, &boundaries(&cell, &CvPolicy::Single));
        assert_eq!(geom.size(), 1);
        assert_eq!(geom.cv_parent, vec![NO_PARENT]);
        assert_eq!(geom.cables(0).len(), 3);
    }

    #[test]
    fn fixed_per_branch_isolates_fork() {
        let cell = two_branch_cell();
        let geom = CvGeometry::new(&cell, &boundaries(&cell, &CvPolicy::FixedPerBranch(2)));
        // 2 CVs per branch plus one trivial CV at the fork.
        assert_eq!(geom.size(), 7);
        let fork_cv = geom
            .cell_cvs(0)
            .find(|&cv| geom.cables(cv).iter().all(Cable::is_trivial))
            .unwrap();
        assert_eq!(geom.cables(fork_cv), &[Cable::new(0, 1.0, 1.0)]);
        // Fork CV parents on branch 0's distal CV; branch 1 and 2 CVs hang
        // off the fork.
        let p = geom.cv_parent[fork_cv];
        assert!(geom.cables(p as usize).contains(&Cable::new(0, 0.5, 1.0)));
        assert_eq!(geom.children(fork_cv).len(), 2);
        // Parent always precedes child.
        for cv in geom.cell_cvs(0) {
            assert!(geom.cv_parent[cv] < cv as i32);
        }
    }

    #[test]
    fn location_cv_preferences() {
        let cell = two_branch_cell();
        let geom = CvGeometry::new(&cell, &boundaries(&cell, &CvPolicy::FixedPerBranch(2)));

        // Interior point: unambiguous.
        let mid = geom.location_cv(0, Location::new(0, 0.25), CvPrefer::Distal);
        assert!(geom.cables(mid as usize).contains(&Cable::new(0, 0.0, 0.5)));

        // Boundary at 0.5 on branch 0.
        let distal = geom.location_cv(0, Location::new(0, 0.5), CvPrefer::Distal);
        let proximal = geom.location_cv(0, Location::new(0, 0.5), CvPrefer::Proximal);
        assert_ne!(distal, proximal);
        assert!(geom
            .cables(distal as usize)
            .contains(&Cable::new(0, 0.5, 1.0)));

        // Branch end: nonempty avoids the trivial fork CV, empty takes it.
        let nonempty = geom.location_cv(0, Location::new(0, 1.0), CvPrefer::Nonempty);
        let empty = geom.location_cv(0, Location::new(0, 1.0), CvPrefer::Empty);
        assert!(!geom.cables(nonempty as usize)[0].is_trivial());
        assert!(geom.cables(empty as usize)[0].is_trivial());
    }

    #[test]
    fn append_offsets_indices() {
        let cell = two_branch_cell();
        let b = boundaries(&cell, &CvPolicy::FixedPerBranch(1));
        let mut geom = CvGeometry::new(&cell, &b);
        let n = geom.size();
        let right = CvGeometry::new(&cell, &b);
        geom.append(&right);
        assert_eq!(geom.size(), 2 * n);
        assert_eq!(geom.n_cell(), 2);
        assert_eq!(geom.cv_to_cell[n], 1);
        assert_eq!(geom.cv_parent[n], NO_PARENT);
        let loc = Location::new(1, 0.5);
        let cv0 = geom.location_cv(0, loc, CvPrefer::Nonempty);
        let cv1 = geom.location_cv(1, loc, CvPrefer::Nonempty);
        assert_eq!(cv1 - cv0, n as u32);
    }
}
