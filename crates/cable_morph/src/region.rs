use crate::embedding::PwlinEmbedding;
use crate::primitives::{cmp_cable, Cable, Location};
use crate::tree::Morphology;
use crate::MorphologyError;

/// A canonical region: sorted, disjoint, per-branch-merged cables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mextent {
    cables: Vec<Cable>,
}

impl Mextent {
    pub fn from_cables(mut cables: Vec<Cable>) -> Self {
        cables.sort_by(cmp_cable);
        let mut merged: Vec<Cable> = Vec::with_capacity(cables.len());
        for c in cables {
            match merged.last_mut() {
                Some(last) if last.branch == c.branch && c.prox_pos <= last.dist_pos => {
                    last.dist_pos = last.dist_pos.max(c.dist_pos);
                }
                _ => merged.push(c),
            }
        }
        Self { cables: merged }
    }

    pub fn cables(&self) -> &[Cable] {
        &self.cables
    }

    pub fn is_empty(&self) -> bool {
        self.cables.is_empty()
    }

    pub fn intersects(&self, loc: Location) -> bool {
        self.cables.iter().any(|c| c.contains(loc))
    }

    pub fn intersect(&self, other: &Mextent) -> Mextent {
        let mut out = Vec::new();
        for a in &self.cables {
            for b in &other.cables {
                if a.branch != b.branch {
                    continue;
                }
                let lo = a.prox_pos.max(b.prox_pos);
                let hi = a.dist_pos.min(b.dist_pos);
                if lo <= hi {
                    out.push(Cable::new(a.branch, lo, hi));
                }
            }
        }
        Mextent::from_cables(out)
    }
}

/// Region expressions; resolved against a morphology to an [`Mextent`].
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// The whole cell.
    All,
    /// All segments carrying the given tag.
    Tagged(i32),
    /// One whole branch.
    Branch(u32),
    /// An explicit cable.
    Cable(Cable),
    Union(Box<Region>, Box<Region>),
    Intersect(Box<Region>, Box<Region>),
}

impl Region {
    pub fn union(a: Region, b: Region) -> Region {
        Region::Union(Box::new(a), Box::new(b))
    }

    pub fn intersect(a: Region, b: Region) -> Region {
        Region::Intersect(Box::new(a), Box::new(b))
    }

    pub fn resolve(
        &self,
        m: &Morphology,
        e: &PwlinEmbedding,
    ) -> Result<Mextent, MorphologyError> {
        match self {
            Region::All => {
                let cables = (0..m.num_branches())
                    .map(|b| Cable::new(b as u32, 0.0, 1.0))
                    .collect();
                Ok(Mextent::from_cables(cables))
            }
            Region::Tagged(tag) => {
                let mut cables = Vec::new();
                for b in 0..m.num_branches() {
                    let segs = m.branch_segments(b);
                    let mut bounds = vec![0.0];
                    bounds.extend(e.segment_boundaries(b));
                    bounds.push(1.0);
                    // One bound interval per segment on the branch.
                    for (i, &s) in segs.iter().enumerate() {
                        if m.segment(s).tag == *tag {
                            let lo = bounds[i.min(bounds.len() - 2)];
                            let hi = bounds[(i + 1).min(bounds.len() - 1)];
                            cables.push(Cable::new(b as u32, lo, hi));
                        }
                    }
                }
                Ok(Mextent::from_cables(cables))
            }
            Region::Branch(b) => {
                if *b as usize >= m.num_branches() {
                    return Err(MorphologyError::BranchOutOfRange(*b));
                }
                Ok(Mextent::from_cables(vec![Cable::new(*b, 0.0, 1.0)]))
            }
            Region::Cable(c) => {
                if c.branch as usize >= m.num_branches()
                    || c.prox_pos > c.dist_pos
                    || c.prox_pos < 0.0
                    || c.dist_pos > 1.0
                {
                    return Err(MorphologyError::InvalidCable {
                        branch: c.branch,
                        prox: c.prox_pos,
                        dist: c.dist_pos,
                    });
                }
                Ok(Mextent::from_cables(vec![*c]))
            }
            Region::Union(a, b) => {
                let mut cables = a.resolve(m, e)?.cables.clone();
                cables.extend_from_slice(b.resolve(m, e)?.cables());
                Ok(Mextent::from_cables(cables))
            }
            Region::Intersect(a, b) => Ok(a.resolve(m, e)?.intersect(&b.resolve(m, e)?)),
        }
    }
}

/// Locset expressions; resolved to a finite ordered list of locations.
#[derive(Debug, Clone, PartialEq)]
pub enum Locset {
    /// The proximal end of the root branch.
    Root,
    /// Distal ends of all terminal branches.
    Terminal,
    /// A single location.
    Location(Location),
    /// An explicit ordered list.
    Explicit(Vec<Location>),
}

impl Locset {
    pub fn resolve(&self, m: &Morphology) -> Result<Vec<Location>, MorphologyError> {
        let check = |loc: &Location| {
            if loc.branch as usize >= m.num_branches() || !(0.0..=1.0).contains(&loc.pos) {
                Err(MorphologyError::InvalidLocation {
                    branch: loc.branch,
                    pos: loc.pos,
                })
            } else {
                Ok(())
            }
        };
        match self {
            Locset::Root => Ok(vec![Location::new(0, 0.0)]),
            Locset::Terminal => Ok(m
                .terminal_branches()
                .into_iter()
                .map(|b| Location::new(b as u32, 1.0))
                .collect()),
            Locset::Location(loc) => {
                check(loc)?;
                Ok(vec![*loc])
            }
            Locset::Explicit(locs) => {
                for loc in locs {
                    check(loc)?;
                }
                Ok(locs.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Point;
    use crate::tree::SegmentTree;

    fn two_tag_cell() -> (Morphology, PwlinEmbedding) {
        let mut tree = SegmentTree::new();
        let soma = tree
            .append(
                None,
                Point::new(0.0, 0.0, 0.0, 3.0),
                Point::new(20.0, 0.0, 0.0, 3.0),
                1,
            )
            .unwrap();
        tree.append(
            Some(soma),
            Point::new(20.0, 0.0, 0.0, 1.0),
            Point::new(100.0, 0.0, 0.0, 1.0),
            3,
        )
        .unwrap();
        let m = Morphology::try_from_tree(tree).unwrap();
        let e = PwlinEmbedding::new(&m);
        (m, e)
    }

    #[test]
    fn tagged_region_splits_branch() {
        let (m, e) = two_tag_cell();
        let soma = Region::Tagged(1).resolve(&m, &e).unwrap();
        assert_eq!(soma.cables(), &[Cable::new(0, 0.0, 0.2)]);
        let dend = Region::Tagged(3).resolve(&m, &e).unwrap();
        assert_eq!(dend.cables(), &[Cable::new(0, 0.2, 1.0)]);
    }

    #[test]
    fn union_merges_overlaps() {
        let (m, e) = two_tag_cell();
        let r = Region::union(
            Region::Cable(Cable::new(0, 0.0, 0.5)),
            Region::Cable(Cable::new(0, 0.3, 0.8)),
        );
        let x = r.resolve(&m, &e).unwrap();
        assert_eq!(x.cables(), &[Cable::new(0, 0.0, 0.8)]);
    }
}
