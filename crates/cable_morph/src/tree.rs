use crate::primitives::Point;
use crate::MorphologyError;
use serde::{Deserialize, Serialize};

/// A truncated-cone morphology segment with an integer tag (SWC convention:
/// 1 soma, 2 axon, 3 dendrite, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub prox: Point,
    pub dist: Point,
    pub tag: i32,
}

/// A rooted tree of segments. Parent ids always precede child ids, which
/// `append` enforces by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentTree {
    segments: Vec<Segment>,
    parents: Vec<Option<usize>>,
}

impl SegmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment under `parent` (`None` attaches to the root) and
    /// return its id.
    pub fn append(
        &mut self,
        parent: Option<usize>,
        prox: Point,
        dist: Point,
        tag: i32,
    ) -> Result<usize, MorphologyError> {
        let id = self.segments.len();
        if let Some(p) = parent {
            if p >= id {
                return Err(MorphologyError::ParentOutOfRange {
                    segment: id,
                    parent: p,
                });
            }
        }
        self.segments.push(Segment { prox, dist, tag });
        self.parents.push(parent);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, id: usize) -> &Segment {
        &self.segments[id]
    }

    pub fn parent(&self, id: usize) -> Option<usize> {
        self.parents[id]
    }
}

/// Branch structure derived from a segment tree: consecutive parent→child
/// segments with no fork merge into one branch; branch ids are contiguous
/// from zero and every parent branch id is smaller than its children's.
#[derive(Debug, Clone, PartialEq)]
pub struct Morphology {
    tree: SegmentTree,
    branch_segments: Vec<Vec<usize>>,
    branch_parent: Vec<Option<usize>>,
    branch_children: Vec<Vec<usize>>,
    segment_branch: Vec<usize>,
}

impl Morphology {
    pub fn try_from_tree(tree: SegmentTree) -> Result<Self, MorphologyError> {
        if tree.is_empty() {
            return Err(MorphologyError::Empty);
        }

        let n = tree.len();
        let mut child_count = vec![0usize; n];
        for id in 0..n {
            if let Some(p) = tree.parent(id) {
                if p >= id {
                    return Err(MorphologyError::InvalidParent {
                        segment: id,
                        parent: p,
                    });
                }
                child_count[p] += 1;
            }
        }

        // A branch starts at a root segment or below a fork. Segment ids are
        // topologically ordered, so scanning in id order assigns branch ids
        // that respect the parent-before-child invariant.
        let mut segment_branch = vec![usize::MAX; n];
        let mut branch_segments: Vec<Vec<usize>> = Vec::new();
        for id in 0..n {
            let starts_branch = match tree.parent(id) {
                None => true,
                Some(p) => child_count[p] != 1,
            };
            if starts_branch {
                segment_branch[id] = branch_segments.len();
                branch_segments.push(vec![id]);
            } else {
                let p = tree.parent(id).unwrap();
                let b = segment_branch[p];
                segment_branch[id] = b;
                branch_segments[b].push(id);
            }
        }

        let n_branch = branch_segments.len();
        let mut branch_parent = vec![None; n_branch];
        let mut branch_children = vec![Vec::new(); n_branch];
        for (b, segs) in branch_segments.iter().enumerate() {
            let head = segs[0];
            if let Some(p) = tree.parent(head) {
                let pb = segment_branch[p];
                branch_parent[b] = Some(pb);
                branch_children[pb].push(b);
            }
        }

        Ok(Self {
            tree,
            branch_segments,
            branch_parent,
            branch_children,
            segment_branch,
        })
    }

    pub fn num_branches(&self) -> usize {
        self.branch_segments.len()
    }

    pub fn branch_parent(&self, branch: usize) -> Option<usize> {
        self.branch_parent[branch]
    }

    pub fn branch_children(&self, branch: usize) -> &[usize] {
        &self.branch_children[branch]
    }

    pub fn branch_segments(&self, branch: usize) -> &[usize] {
        &self.branch_segments[branch]
    }

    pub fn segment(&self, id: usize) -> &Segment {
        self.tree.segment(id)
    }

    pub fn segment_branch(&self, id: usize) -> usize {
        self.segment_branch[id]
    }

    pub fn num_segments(&self) -> usize {
        self.tree.len()
    }

    /// Branches with no children.
    pub fn terminal_branches(&self) -> Vec<usize> {
        (0..self.num_branches())
            .filter(|&b| self.branch_children[b].is_empty())
            .collect()
    }
}
