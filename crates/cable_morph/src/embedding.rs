use crate::primitives::{Cable, PwOverCable};
use crate::tree::Morphology;

const PI: f64 = std::f64::consts::PI;

#[derive(Debug, Clone, Copy)]
struct SegSpan {
    // Relative position interval on the branch.
    lo: f64,
    hi: f64,
    len: f64,
    r_prox: f64,
    r_dist: f64,
}

/// Piecewise-linear embedding of a morphology: maps relative branch
/// positions to arc length and radius, and provides the surface-area and
/// axial-resistance integrals the discretization is built on.
///
/// Area integrates the lateral surface of each truncated cone (slant
/// length); axial resistance integrates `ρ/(π r²)` along the axis, which for
/// a linear radius profile is `ρ·L/(π·r_prox·r_dist)` per piece.
#[derive(Debug, Clone)]
pub struct PwlinEmbedding {
    spans: Vec<Vec<SegSpan>>,
    lengths: Vec<f64>,
}

impl PwlinEmbedding {
    pub fn new(m: &Morphology) -> Self {
        let mut spans = Vec::with_capacity(m.num_branches());
        let mut lengths = Vec::with_capacity(m.num_branches());
        for b in 0..m.num_branches() {
            let segs = m.branch_segments(b);
            let seg_lens: Vec<f64> = segs
                .iter()
                .map(|&s| {
                    let seg = m.segment(s);
                    seg.prox.distance(&seg.dist)
                })
                .collect();
            let total: f64 = seg_lens.iter().sum();
            let mut branch_spans = Vec::with_capacity(segs.len());
            let mut acc = 0.0;
            for (&s, &len) in segs.iter().zip(&seg_lens) {
                let seg = m.segment(s);
                let lo = if total > 0.0 { acc / total } else { 0.0 };
                acc += len;
                let hi = if total > 0.0 { acc / total } else { 0.0 };
                branch_spans.push(SegSpan {
                    lo,
                    hi,
                    len,
                    r_prox: seg.prox.radius,
                    r_dist: seg.dist.radius,
                });
            }
            // Pin the last span's upper bound to exactly 1.
            if let Some(last) = branch_spans.last_mut() {
                if total > 0.0 {
                    last.hi = 1.0;
                }
            }
            spans.push(branch_spans);
            lengths.push(total);
        }
        Self { spans, lengths }
    }

    pub fn num_branches(&self) -> usize {
        self.spans.len()
    }

    pub fn branch_length(&self, branch: usize) -> f64 {
        self.lengths[branch]
    }

    /// Interior relative positions at segment joins.
    pub fn segment_boundaries(&self, branch: usize) -> Vec<f64> {
        let spans = &self.spans[branch];
        spans
            .iter()
            .take(spans.len().saturating_sub(1))
            .map(|s| s.hi)
            .filter(|&p| p > 0.0 && p < 1.0)
            .collect()
    }

    pub fn radius_at(&self, branch: usize, pos: f64) -> f64 {
        let spans = &self.spans[branch];
        let n = spans.len();
        for (i, s) in spans.iter().enumerate() {
            if pos <= s.hi || i + 1 == n {
                if s.hi <= s.lo {
                    return s.r_dist;
                }
                let t = ((pos - s.lo) / (s.hi - s.lo)).clamp(0.0, 1.0);
                return s.r_prox + t * (s.r_dist - s.r_prox);
            }
        }
        0.0
    }

    pub fn integrate_length(&self, cable: Cable) -> f64 {
        (cable.dist_pos - cable.prox_pos) * self.lengths[cable.branch as usize]
    }

    /// Membrane surface area of `cable` in µm².
    pub fn integrate_area(&self, cable: Cable) -> f64 {
        self.fold_subspans(cable, |ra, rb, dl| {
            let slant = (dl * dl + (rb - ra) * (rb - ra)).sqrt();
            PI * (ra + rb) * slant
        })
    }

    /// Area-weighted integral of a piecewise-constant function over a cable:
    /// `∫ f dA` in [value]·µm².
    pub fn integrate_area_pw(&self, branch: u32, pw: &PwOverCable) -> f64 {
        pw.iter()
            .map(|p| p.value * self.integrate_area(Cable::new(branch, p.lo, p.hi)))
            .sum()
    }

    /// Axial resistance of a cable under a piecewise-constant resistivity
    /// [Ω·cm]: `∫ ρ/(π r²) dx` with lengths in µm. The face-conductance
    /// conversion `g = 100/R` yields µS.
    pub fn integrate_ixa_pw(&self, branch: u32, pw: &PwOverCable) -> f64 {
        pw.iter()
            .map(|p| {
                p.value
                    * self.fold_subspans(Cable::new(branch, p.lo, p.hi), |ra, rb, dl| {
                        if dl == 0.0 {
                            0.0
                        } else {
                            dl / (PI * ra * rb)
                        }
                    })
            })
            .sum()
    }

    // Accumulate f(r_prox, r_dist, axial_len) over the sub-frusta covered by
    // the cable.
    fn fold_subspans<F: Fn(f64, f64, f64) -> f64>(&self, cable: Cable, f: F) -> f64 {
        let spans = &self.spans[cable.branch as usize];
        let mut acc = 0.0;
        for s in spans {
            let lo = cable.prox_pos.max(s.lo);
            let hi = cable.dist_pos.min(s.hi);
            if hi <= lo || s.hi <= s.lo {
                continue;
            }
            let ta = (lo - s.lo) / (s.hi - s.lo);
            let tb = (hi - s.lo) / (s.hi - s.lo);
            let ra = s.r_prox + ta * (s.r_dist - s.r_prox);
            let rb = s.r_prox + tb * (s.r_dist - s.r_prox);
            let dl = (tb - ta) * s.len;
            acc += f(ra, rb, dl);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Point, PwElement};
    use crate::tree::SegmentTree;

    fn cylinder(len: f64, r: f64) -> Morphology {
        let mut tree = SegmentTree::new();
        tree.append(
            None,
            Point::new(0.0, 0.0, 0.0, r),
            Point::new(len, 0.0, 0.0, r),
            3,
        )
        .unwrap();
        Morphology::try_from_tree(tree).unwrap()
    }

    #[test]
    fn cylinder_area_and_resistance() {
        let m = cylinder(100.0, 2.0);
        let e = PwlinEmbedding::new(&m);
        let area = e.integrate_area(Cable::new(0, 0.0, 1.0));
        assert!((area - 2.0 * PI * 2.0 * 100.0).abs() < 1e-9);

        // R = ρ·L/(π r²); ρ = 100 Ω·cm over the whole branch.
        let pw = vec![PwElement {
            lo: 0.0,
            hi: 1.0,
            value: 100.0,
        }];
        let r = e.integrate_ixa_pw(0, &pw);
        assert!((r - 100.0 * 100.0 / (PI * 4.0)).abs() < 1e-9);
    }

    #[test]
    fn half_cable_has_half_length() {
        let m = cylinder(80.0, 1.0);
        let e = PwlinEmbedding::new(&m);
        assert!((e.integrate_length(Cable::new(0, 0.25, 0.75)) - 40.0).abs() < 1e-12);
    }
}
