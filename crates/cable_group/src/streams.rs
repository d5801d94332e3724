//! Per-intdom event streams: spike-derived deliverable events and scheduled
//! sample events, staged per epoch and marked off step by step.

use cable_mech::Deliverable;

/// A staged event with its resolved target handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagedEvent {
    pub time: f64,
    pub weight: f64,
    pub mech_id: u32,
    pub mech_index: u32,
    pub intdom: u32,
}

/// Sorted staged events partitioned by intdom, with a moving mark per
/// partition. Events keep their staging order under equal times.
#[derive(Debug, Clone, Default)]
pub struct DeliverableEventStream {
    ev: Vec<StagedEvent>,
    span_begin: Vec<usize>,
    span_end: Vec<usize>,
    mark: Vec<usize>,
}

impl DeliverableEventStream {
    pub fn new(n_intdom: usize) -> Self {
        Self {
            ev: Vec::new(),
            span_begin: vec![0; n_intdom],
            span_end: vec![0; n_intdom],
            mark: vec![0; n_intdom],
        }
    }

    pub fn init(&mut self, mut staged: Vec<StagedEvent>) {
        // Stable: equal (intdom, time) keep staging order.
        staged.sort_by(|a, b| {
            (a.intdom, a.time)
                .partial_cmp(&(b.intdom, b.time))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = self.span_begin.len();
        let mut cursor = 0;
        for d in 0..n {
            self.span_begin[d] = cursor;
            while cursor < staged.len() && staged[cursor].intdom as usize == d {
                cursor += 1;
            }
            self.span_end[d] = cursor;
            self.mark[d] = self.span_begin[d];
        }
        self.ev = staged;
    }

    pub fn is_empty(&self) -> bool {
        self.span_begin
            .iter()
            .zip(&self.span_end)
            .all(|(b, e)| b == e)
    }

    /// Mark events with `time ≤ t` of their intdom as deliverable.
    pub fn mark_until_after(&mut self, t: &[f64]) {
        for d in 0..self.span_begin.len() {
            let mut m = self.mark[d];
            while m < self.span_end[d] && self.ev[m].time <= t[d] {
                m += 1;
            }
            self.mark[d] = m;
        }
    }

    /// All currently marked events, flattened for mechanism delivery.
    pub fn marked_events(&self) -> Vec<Deliverable> {
        let mut out = Vec::new();
        for d in 0..self.span_begin.len() {
            for ev in &self.ev[self.span_begin[d]..self.mark[d]] {
                out.push(Deliverable {
                    mech_id: ev.mech_id,
                    index: ev.mech_index,
                    weight: ev.weight,
                });
            }
        }
        out
    }

    pub fn drop_marked_events(&mut self) {
        for d in 0..self.span_begin.len() {
            self.span_begin[d] = self.mark[d];
        }
    }

    /// Clip `time_to` to the next pending event time per intdom.
    pub fn event_time_if_before(&self, time_to: &mut [f64]) {
        for d in 0..self.span_begin.len() {
            if self.span_begin[d] < self.span_end[d] {
                let t = self.ev[self.span_begin[d]].time;
                if t < time_to[d] {
                    time_to[d] = t;
                }
            }
        }
    }
}

/// A staged sample request bound to a resolved probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagedSample {
    pub time: f64,
    pub intdom: u32,
    /// Index into the group's resolved sampler association table.
    pub assoc: u32,
    /// Exact samples constrain `time_to` to land on the sample time.
    pub exact: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SampleEventStream {
    ev: Vec<StagedSample>,
    span_begin: Vec<usize>,
    span_end: Vec<usize>,
    mark: Vec<usize>,
}

impl SampleEventStream {
    pub fn new(n_intdom: usize) -> Self {
        Self {
            ev: Vec::new(),
            span_begin: vec![0; n_intdom],
            span_end: vec![0; n_intdom],
            mark: vec![0; n_intdom],
        }
    }

    pub fn init(&mut self, mut staged: Vec<StagedSample>) {
        staged.sort_by(|a, b| {
            (a.intdom, a.time)
                .partial_cmp(&(b.intdom, b.time))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = self.span_begin.len();
        let mut cursor = 0;
        for d in 0..n {
            self.span_begin[d] = cursor;
            while cursor < staged.len() && staged[cursor].intdom as usize == d {
                cursor += 1;
            }
            self.span_end[d] = cursor;
            self.mark[d] = self.span_begin[d];
        }
        self.ev = staged;
    }

    /// Mark samples scheduled strictly before `time_to` of their intdom.
    pub fn mark_until(&mut self, time_to: &[f64]) {
        for d in 0..self.span_begin.len() {
            let mut m = self.mark[d];
            while m < self.span_end[d] && self.ev[m].time < time_to[d] {
                m += 1;
            }
            self.mark[d] = m;
        }
    }

    pub fn marked_events(&self) -> impl Iterator<Item = &StagedSample> + '_ {
        (0..self.span_begin.len())
            .flat_map(move |d| self.ev[self.span_begin[d]..self.mark[d]].iter())
    }

    pub fn drop_marked_events(&mut self) {
        for d in 0..self.span_begin.len() {
            self.span_begin[d] = self.mark[d];
        }
    }

    /// Clip `time_to` to the next exact-policy sample time per intdom.
    /// Samples at or before the current time are due this step already and
    /// must not stall the step.
    pub fn exact_time_if_before(&self, time: &[f64], time_to: &mut [f64]) {
        for d in 0..self.span_begin.len() {
            for ev in &self.ev[self.span_begin[d]..self.span_end[d]] {
                if !ev.exact || ev.time <= time[d] {
                    continue;
                }
                if ev.time < time_to[d] {
                    time_to[d] = ev.time;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(time: f64, intdom: u32, mech_index: u32) -> StagedEvent {
        StagedEvent {
            time,
            weight: 1.0,
            mech_id: 0,
            mech_index,
            intdom,
        }
    }

    #[test]
    fn marking_respects_intdom_times() {
        let mut stream = DeliverableEventStream::new(2);
        stream.init(vec![
            staged(1.0, 0, 0),
            staged(2.0, 0, 1),
            staged(0.5, 1, 2),
        ]);

        stream.mark_until_after(&[1.0, 0.0]);
        let marked = stream.marked_events();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].index, 0);

        let mut time_to = [5.0, 5.0];
        stream.drop_marked_events();
        stream.event_time_if_before(&mut time_to);
        assert_eq!(time_to, [2.0, 0.5]);
    }

    #[test]
    fn equal_times_preserve_staging_order() {
        let mut stream = DeliverableEventStream::new(1);
        stream.init(vec![staged(1.0, 0, 7), staged(1.0, 0, 8), staged(1.0, 0, 9)]);
        stream.mark_until_after(&[1.0]);
        let idx: Vec<u32> = stream.marked_events().iter().map(|e| e.index).collect();
        assert_eq!(idx, vec![7, 8, 9]);
    }

    #[test]
    fn exact_samples_clip_time_to() {
        let mut stream = SampleEventStream::new(1);
        stream.init(vec![
            StagedSample {
                time: 0.4,
                intdom: 0,
                assoc: 0,
                exact: false,
            },
            StagedSample {
                time: 0.7,
                intdom: 0,
                assoc: 0,
                exact: true,
            },
        ]);
        let mut time_to = [1.0];
        stream.exact_time_if_before(&[0.0], &mut time_to);
        // The first exact sample wins; the lax one before it does not clip.
        assert_eq!(time_to, [0.7]);

        // An exact sample at the current boundary is due now and must not
        // stall the step.
        let mut time_to = [1.0];
        stream.exact_time_if_before(&[0.7], &mut time_to);
        assert_eq!(time_to, [1.0]);
    }
}
