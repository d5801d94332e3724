#![forbid(unsafe_code)]

//! Morphology model: segment trees, the derived branch structure, locations
//! and cables, region/locset expressions and the piecewise-linear embedding
//! used for area, length and axial-resistance integrals.

mod embedding;
mod primitives;
mod region;
mod tree;

pub use embedding::PwlinEmbedding;
pub use primitives::{pw_over_cable, Cable, Location, McableMap, Point, PwElement, PwOverCable};
pub use region::{Locset, Mextent, Region};
pub use tree::{Morphology, Segment, SegmentTree};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MorphologyError {
    #[error("segment parent {parent} does not precede segment {segment}")]
    InvalidParent { segment: usize, parent: usize },
    #[error("segment parent {parent} out of range for segment {segment}")]
    ParentOutOfRange { segment: usize, parent: usize },
    #[error("branch {0} out of range")]
    BranchOutOfRange(u32),
    #[error("location ({branch}, {pos}) is not a valid location")]
    InvalidLocation { branch: u32, pos: f64 },
    #[error("cable ({branch}, {prox}, {dist}) is not a valid cable")]
    InvalidCable { branch: u32, prox: f64, dist: f64 },
    #[error("overlapping cable assignment on branch {0}")]
    OverlappingAssignment(u32),
    #[error("morphology has no segments")]
    Empty,
}

/// CV discretization policies. `boundary_points` yields the per-branch
/// boundary locations that cut the morphology into control volumes; branch
/// extremities that appear in the result separate the branch interior from
/// the fork point it meets.
#[derive(Debug, Clone, PartialEq)]
pub enum CvPolicy {
    /// The whole cell as one control volume.
    Single,
    /// `n` equal-length CVs per branch, cut at every fork.
    FixedPerBranch(u32),
    /// One CV per morphological segment.
    EverySegment,
    /// Explicit boundary locations.
    Explicit(Vec<Location>),
}

impl CvPolicy {
    pub fn boundary_points(&self, m: &Morphology, e: &PwlinEmbedding) -> Vec<Location> {
        let mut points = Vec::new();
        match self {
            CvPolicy::Single => {}
            CvPolicy::FixedPerBranch(n) => {
                let n = (*n).max(1);
                for b in 0..m.num_branches() {
                    for k in 0..=n {
                        points.push(Location::new(b as u32, f64::from(k) / f64::from(n)));
                    }
                }
            }
            CvPolicy::EverySegment => {
                for b in 0..m.num_branches() {
                    points.push(Location::new(b as u32, 0.0));
                    for pos in e.segment_boundaries(b) {
                        points.push(Location::new(b as u32, pos));
                    }
                    points.push(Location::new(b as u32, 1.0));
                }
            }
            CvPolicy::Explicit(locs) => points.extend_from_slice(locs),
        }
        points.sort_by(|a, b| {
            a.branch
                .cmp(&b.branch)
                .then(a.pos.partial_cmp(&b.pos).unwrap_or(std::cmp::Ordering::Equal))
        });
        points.dedup_by(|a, b| a.branch == b.branch && a.pos == b.pos);
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn y_tree() -> SegmentTree {
        // Soma cylinder plus two dendrite branches.
        let mut tree = SegmentTree::new();
        let soma = tree
            .append(
                None,
                Point::new(0.0, 0.0, 0.0, 3.0),
                Point::new(10.0, 0.0, 0.0, 3.0),
                1,
            )
            .unwrap();
        let d0 = tree
            .append(
                Some(soma),
                Point::new(10.0, 0.0, 0.0, 1.0),
                Point::new(110.0, 0.0, 0.0, 1.0),
                3,
            )
            .unwrap();
        tree.append(
            Some(d0),
            Point::new(110.0, 0.0, 0.0, 0.5),
            Point::new(210.0, 0.0, 0.0, 0.5),
            3,
        )
        .unwrap();
        tree.append(
            Some(d0),
            Point::new(110.0, 0.0, 0.0, 0.5),
            Point::new(110.0, 100.0, 0.0, 0.5),
            3,
        )
        .unwrap();
        tree
    }

    #[test]
    fn branches_follow_forks() {
        let m = Morphology::try_from_tree(y_tree()).unwrap();
        // Soma+dend0 merge into branch 0 (no fork between them), the two
        // child dendrites are branches 1 and 2.
        assert_eq!(m.num_branches(), 3);
        assert_eq!(m.branch_parent(0), None);
        assert_eq!(m.branch_parent(1), Some(0));
        assert_eq!(m.branch_parent(2), Some(0));
        assert_eq!(m.branch_children(0), &[1, 2]);
    }

    #[test]
    fn fixed_per_branch_boundaries() {
        let m = Morphology::try_from_tree(y_tree()).unwrap();
        let e = PwlinEmbedding::new(&m);
        let pts = CvPolicy::FixedPerBranch(2).boundary_points(&m, &e);
        assert_eq!(pts.len(), 9);
        assert!(pts.contains(&Location::new(0, 0.5)));
        assert!(pts.contains(&Location::new(2, 1.0)));
    }
}
