#![forbid(unsafe_code)]

//! Event plumbing for the cable-cell core: spike-derived events sorted into
//! per-cell lanes, a stable tournament-tree merge over sorted event spans,
//! sample schedules and recipe-level event generators.

use cable_core::CellLid;
use serde::{Deserialize, Serialize};

/// An event due at a cell-local target: `(target lid, time, weight)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub target: CellLid,
    pub time: f64,
    pub weight: f64,
}

impl SpikeEvent {
    pub fn new(target: u32, time: f64, weight: f64) -> Self {
        Self {
            target: CellLid(target),
            time,
            weight,
        }
    }
}

/// Merge sorted event spans into a sorted output, stable under equal times
/// (earlier lanes win ties, intra-lane order is preserved).
///
/// Small inputs fall back to a linear merge; larger ones use the tournament
/// tree, O(log #lanes) per event.
pub fn merge_events(sources: &[&[SpikeEvent]], out: &mut Vec<SpikeEvent>) {
    match sources.len() {
        0 => {}
        1 => out.extend_from_slice(sources[0]),
        2..=3 => linear_merge_events(sources, out),
        _ => tree_merge_events(sources, out),
    }
}

fn event_le(a: &SpikeEvent, lane_a: usize, b: &SpikeEvent, lane_b: usize) -> bool {
    (a.time, lane_a) <= (b.time, lane_b)
}

fn linear_merge_events(sources: &[&[SpikeEvent]], out: &mut Vec<SpikeEvent>) {
    let mut cursor = vec![0usize; sources.len()];
    let total: usize = sources.iter().map(|s| s.len()).sum();
    out.reserve(total);
    for _ in 0..total {
        let mut best: Option<usize> = None;
        for (lane, src) in sources.iter().enumerate() {
            if cursor[lane] >= src.len() {
                continue;
            }
            best = match best {
                None => Some(lane),
                Some(b)
                    if !event_le(
                        &sources[b][cursor[b]],
                        b,
                        &src[cursor[lane]],
                        lane,
                    ) =>
                {
                    Some(lane)
                }
                other => other,
            };
        }
        let lane = best.expect("total count guarantees a live lane");
        out.push(sources[lane][cursor[lane]]);
        cursor[lane] += 1;
    }
}

/// Tournament tree over event lanes. Internal nodes hold the winning
/// `(lane, event)` pair of their subtree; popping replays the winner's path.
struct TourneyTree<'a> {
    heap: Vec<(usize, Option<SpikeEvent>)>,
    input: &'a [&'a [SpikeEvent]],
    cursor: Vec<usize>,
    leaves: usize,
}

impl<'a> TourneyTree<'a> {
    fn new(input: &'a [&'a [SpikeEvent]]) -> Self {
        let n_lanes = input.len();
        let leaves = n_lanes.next_power_of_two();
        let nodes = 2 * leaves - 1;
        let mut tree = Self {
            heap: vec![(usize::MAX, None); nodes],
            input,
            cursor: vec![0; n_lanes],
            leaves,
        };
        for lane in 0..n_lanes {
            let leaf = tree.leaf(lane);
            tree.heap[leaf] = (lane, input[lane].first().copied());
        }
        for i in (0..leaves - 1).rev() {
            tree.merge_up(i);
        }
        tree
    }

    fn leaf(&self, lane: usize) -> usize {
        self.leaves - 1 + lane
    }

    fn empty(&self) -> bool {
        self.heap[0].1.is_none()
    }

    fn head(&self) -> SpikeEvent {
        self.heap[0].1.expect("head of non-empty tree")
    }

    fn pop(&mut self) {
        let lane = self.heap[0].0;
        self.cursor[lane] += 1;
        let leaf = self.leaf(lane);
        self.heap[leaf] = (lane, self.input[lane].get(self.cursor[lane]).copied());

        // Replay the path from the exhausted leaf to the root.
        let mut i = leaf;
        while i > 0 {
            i = (i - 1) / 2;
            self.merge_up(i);
        }
    }

    fn merge_up(&mut self, i: usize) {
        let l = 2 * i + 1;
        let r = 2 * i + 2;
        self.heap[i] = match (self.heap[l], self.heap[r]) {
            (left @ (_, Some(_)), (_, None)) => left,
            ((_, None), right) => right,
            (left @ (ll, Some(le)), right @ (rl, Some(re))) => {
                if event_le(&le, ll, &re, rl) {
                    left
                } else {
                    right
                }
            }
        };
    }
}

pub fn tree_merge_events(sources: &[&[SpikeEvent]], out: &mut Vec<SpikeEvent>) {
    if sources.is_empty() {
        return;
    }
    let mut tree = TourneyTree::new(sources);
    out.reserve(sources.iter().map(|s| s.len()).sum());
    while !tree.empty() {
        out.push(tree.head());
        tree.pop();
    }
}

/// Sample/event schedules: a finite sorted list of times per query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    /// Times `t0 + k·dt` for `k ≥ 0`, optionally bounded by `t1`.
    Regular {
        t0: f64,
        dt: f64,
        t1: Option<f64>,
    },
    /// An explicit sorted list of times.
    Explicit(Vec<f64>),
}

impl Schedule {
    pub fn regular(t0: f64, dt: f64) -> Self {
        Schedule::Regular { t0, dt, t1: None }
    }

    pub fn explicit(mut times: Vec<f64>) -> Self {
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Schedule::Explicit(times)
    }

    /// Times in `[from, to)`, sorted ascending.
    pub fn events(&self, from: f64, to: f64) -> Vec<f64> {
        match self {
            Schedule::Regular { t0, dt, t1 } => {
                let to = t1.map_or(to, |t1| to.min(t1));
                if *dt <= 0.0 || to <= *t0 {
                    return if *t0 >= from && *t0 < to {
                        vec![*t0]
                    } else {
                        Vec::new()
                    };
                }
                let first = if from <= *t0 {
                    0
                } else {
                    ((from - t0) / dt).ceil() as u64
                };
                let mut times = Vec::new();
                let mut k = first;
                loop {
                    let t = t0 + k as f64 * dt;
                    if t >= to {
                        break;
                    }
                    if t >= from {
                        times.push(t);
                    }
                    k += 1;
                }
                times
            }
            Schedule::Explicit(all) => all
                .iter()
                .copied()
                .filter(|&t| t >= from && t < to)
                .collect(),
        }
    }
}

/// A recipe-level event source: events at schedule times, all addressed to
/// one target with one weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGenerator {
    pub target: CellLid,
    pub weight: f64,
    pub schedule: Schedule,
}

impl EventGenerator {
    pub fn new(target: u32, weight: f64, schedule: Schedule) -> Self {
        Self {
            target: CellLid(target),
            weight,
            schedule,
        }
    }

    pub fn events(&self, from: f64, to: f64) -> Vec<SpikeEvent> {
        self.schedule
            .events(from, to)
            .into_iter()
            .map(|t| SpikeEvent {
                target: self.target,
                time: t,
                weight: self.weight,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(target: u32, time: f64) -> SpikeEvent {
        SpikeEvent::new(target, time, 1.0)
    }

    #[test]
    fn merge_is_sorted_and_stable() {
        let a = vec![ev(0, 1.0), ev(0, 3.0), ev(0, 3.0)];
        let b = vec![ev(1, 1.0), ev(1, 2.0)];
        let c = vec![ev(2, 3.0)];
        let d = vec![ev(3, 0.5)];
        let e: Vec<SpikeEvent> = vec![];
        let sources: Vec<&[SpikeEvent]> =
            vec![a.as_slice(), b.as_slice(), c.as_slice(), d.as_slice(), e.as_slice()];
        let mut out = Vec::new();
        merge_events(&sources, &mut out);

        let times: Vec<f64> = out.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
        // Equal times preserve lane order: lane 0 before lane 1 at t=1,
        // lane 0's two t=3 events precede lane 2's.
        assert_eq!(out[1].target.0, 0);
        assert_eq!(out[2].target.0, 1);
        assert_eq!(out[4].target.0, 0);
        assert_eq!(out[5].target.0, 0);
        assert_eq!(out[6].target.0, 2);
    }

    #[test]
    fn tree_and_linear_merges_agree() {
        let lanes: Vec<Vec<SpikeEvent>> = (0..6)
            .map(|lane| {
                (0..10)
                    .map(|k| ev(lane, (k * (lane as usize + 1) % 7) as f64))
                    .collect::<Vec<_>>()
            })
            .map(|mut v: Vec<SpikeEvent>| {
                v.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
                v
            })
            .collect();
        let spans: Vec<&[SpikeEvent]> = lanes.iter().map(Vec::as_slice).collect();

        let mut linear = Vec::new();
        linear_merge_events(&spans, &mut linear);
        let mut tree = Vec::new();
        tree_merge_events(&spans, &mut tree);
        assert_eq!(linear, tree);
    }

    #[test]
    fn regular_schedule_window() {
        let s = Schedule::regular(1.0, 0.5);
        assert_eq!(s.events(0.0, 2.1), vec![1.0, 1.5, 2.0]);
        assert_eq!(s.events(1.5, 1.6), vec![1.5]);
        assert!(s.events(0.0, 1.0).is_empty());
    }

    #[test]
    fn explicit_schedule_is_half_open() {
        let s = Schedule::explicit(vec![3.0, 1.0, 2.0]);
        assert_eq!(s.events(1.0, 3.0), vec![1.0, 2.0]);
    }
}
