//! The simulation object: builds cell groups and the communicator from a
//! recipe and a distributed context, then runs the epoch loop of length
//! `min_delay/2`, gathering spikes between epochs and expanding them into
//! per-cell event lanes two epochs ahead.

use crate::partition::{local_intdoms, partition_load_balance};
use crate::{CellDescription, Recipe, SimulationError};
use cable_comm::{Communicator, ConnectionInput, Distributed};
use cable_core::{CellGid, CellMember, Spike};
use cable_events::{merge_events, EventGenerator, Schedule, SpikeEvent};
use cable_fvm::{discretize, gap_junction_cv_map, resolve_gap_junctions};
use cable_group::{CableCellGroup, SamplePolicy, SampleRecord, SampleRequest, SamplerId};
use cable_mech::{default_catalogue, Catalogue};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::BTreeMap;

struct SamplerAssoc {
    id: SamplerId,
    probe: CellMember,
    schedule: Schedule,
    policy: SamplePolicy,
}

pub struct Simulation {
    dist: Box<dyn Distributed>,
    group: CableCellGroup,
    communicator: Communicator,
    /// Pending events per local cell, sorted by time; drained epoch by
    /// epoch into the group's event lanes.
    pending: Vec<Vec<SpikeEvent>>,
    generators: Vec<Vec<EventGenerator>>,
    samplers: Vec<SamplerAssoc>,
    next_sampler: SamplerId,
    records: Vec<SampleRecord>,
    spikes: Vec<Spike>,
    time: f64,
    epoch_interval: f64,
}

impl Simulation {
    pub fn new(rec: &dyn Recipe, dist: Box<dyn Distributed>) -> Result<Self, SimulationError> {
        Self::with_catalogue(rec, dist, &default_catalogue())
    }

    pub fn with_catalogue(
        rec: &dyn Recipe,
        dist: Box<dyn Distributed>,
        catalogue: &Catalogue,
    ) -> Result<Self, SimulationError> {
        let decomposition = partition_load_balance(rec, dist.as_ref())?;
        let gids = decomposition.local_gids.clone();
        let gprop = rec.global_properties();

        let mut cells = Vec::with_capacity(gids.len());
        for &gid in &gids {
            match rec.cell_description(gid) {
                CellDescription::Cable(cell) => cells.push(*cell),
                _ => return Err(SimulationError::BadCellDescription(gid.0)),
            }
        }

        // Gap junctions: publish this rank's site map with globally offset
        // CV indices, all-gather, then resolve the recipe's connections.
        let d = discretize(&cells, &gprop)?;
        let counts = dist.gather_u32(d.size() as u32);
        let cv_offset: u32 = counts[..dist.rank()].iter().sum();
        let local_map = gap_junction_cv_map(&cells, &gids, &d, cv_offset);
        let global_map = dist.gather_gj_entries(&local_map);

        let mut gj_conns_by_gid = BTreeMap::new();
        for &gid in &gids {
            gj_conns_by_gid.insert(gid, rec.gap_junctions_on(gid));
        }
        let resolved = resolve_gap_junctions(&gids, &gj_conns_by_gid, &global_map)?;

        let (cell_to_intdom, n_intdom) = local_intdoms(rec, &gids);

        let mut probes = BTreeMap::new();
        for &gid in &gids {
            probes.insert(gid, rec.probes(gid));
        }

        let group = CableCellGroup::new(
            cells,
            gids.clone(),
            &gprop,
            catalogue,
            &resolved,
            cv_offset,
            cell_to_intdom,
            n_intdom,
            &probes,
        )?;

        // Connection table for the communicator: one lane per local cell.
        let mut conns = Vec::new();
        let mut generators = Vec::with_capacity(gids.len());
        for (cell_idx, &gid) in gids.iter().enumerate() {
            for c in rec.connections_on(gid) {
                if c.delay <= 0.0 {
                    return Err(SimulationError::NonPositiveDelay(gid.0, c.delay));
                }
                conns.push(ConnectionInput {
                    source: c.source,
                    target_cell_index: cell_idx as u32,
                    target_lid: c.target_lid,
                    weight: c.weight,
                    delay: c.delay,
                });
            }
            generators.push(rec.event_generators(gid));
        }
        let communicator = Communicator::new(conns, &decomposition.gid_domain, dist.as_ref());

        let min_delay = communicator.min_delay();
        let epoch_interval = if min_delay.is_finite() {
            min_delay / 2.0
        } else {
            f64::INFINITY
        };
        log::debug!(
            "simulation: {} local cells, epoch interval {epoch_interval}",
            gids.len()
        );

        let n_local = gids.len();
        Ok(Self {
            dist,
            group,
            communicator,
            pending: vec![Vec::new(); n_local],
            generators,
            samplers: Vec::new(),
            next_sampler: 0,
            records: Vec::new(),
            spikes: Vec::new(),
            time: 0.0,
            epoch_interval,
        })
    }

    /// Attach a sampler to a probe. Probes on remote ranks yield no local
    /// records; the id is still valid.
    pub fn add_sampler(
        &mut self,
        probe: CellMember,
        schedule: Schedule,
        policy: SamplePolicy,
    ) -> SamplerId {
        let id = self.next_sampler;
        self.next_sampler += 1;
        self.samplers.push(SamplerAssoc {
            id,
            probe,
            schedule,
            policy,
        });
        id
    }

    /// Samples recorded so far for a sampler, in time order per probe.
    pub fn samples(&self, id: SamplerId) -> impl Iterator<Item = &SampleRecord> + '_ {
        self.records.iter().filter(move |r| r.sampler == id)
    }

    /// All spikes emitted by local cells so far.
    pub fn spikes(&self) -> &[Spike] {
        &self.spikes
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn min_delay(&self) -> f64 {
        self.communicator.min_delay()
    }

    /// Run to `t_final` with integration timestep bound `dt_max`. Epochs of
    /// length `min_delay/2` alternate integration with the spike exchange;
    /// events generated in epoch `e` are staged no earlier than epoch
    /// `e + 2` since every connection delay is at least `min_delay`.
    pub fn run(&mut self, t_final: f64, dt_max: f64) -> Result<f64, SimulationError> {
        while self.time < t_final {
            let t0 = self.time;
            let t1 = (t0 + self.epoch_interval).min(t_final);

            // Stage this epoch's lanes: pending network events merged with
            // generator events inside the window.
            let mut lanes: Vec<Vec<SpikeEvent>> = Vec::with_capacity(self.pending.len());
            for (cell_idx, pending) in self.pending.iter_mut().enumerate() {
                let split = pending.partition_point(|ev| ev.time < t1);
                let due: Vec<SpikeEvent> = pending.drain(..split).collect();
                let mut gen_events: Vec<SpikeEvent> = Vec::new();
                for generator in &self.generators[cell_idx] {
                    let evs = generator.events(t0, t1);
                    if !gen_events.is_empty() && !evs.is_empty() {
                        let merged_in = {
                            let spans = [gen_events.as_slice(), evs.as_slice()];
                            let mut out = Vec::new();
                            merge_events(&spans, &mut out);
                            out
                        };
                        gen_events = merged_in;
                    } else if gen_events.is_empty() {
                        gen_events = evs;
                    }
                }
                let mut lane = Vec::new();
                merge_events(&[due.as_slice(), gen_events.as_slice()], &mut lane);
                lanes.push(lane);
            }

            // Sampling demand for the window.
            let mut requests = Vec::new();
            for s in &self.samplers {
                let times = s.schedule.events(t0, t1);
                if !times.is_empty() {
                    requests.push(SampleRequest {
                        sampler: s.id,
                        probe: s.probe,
                        times,
                        policy: s.policy,
                    });
                }
            }

            // Advance the local cell group over the epoch.
            let result = self.advance_groups(t1, dt_max, &lanes, &requests)?;
            self.records.extend(result.samples);
            let local_spikes = result.spikes;
            self.spikes.extend_from_slice(&local_spikes);

            // Exchange and expand into future event lanes.
            let gathered = self.communicator.exchange(local_spikes, self.dist.as_ref());
            let mut queues: Vec<Vec<SpikeEvent>> = vec![Vec::new(); self.pending.len()];
            self.communicator.make_event_queues(&gathered, &mut queues);
            for (pending, queue) in self.pending.iter_mut().zip(queues) {
                if queue.is_empty() {
                    continue;
                }
                let mut merged = Vec::new();
                merge_events(&[pending.as_slice(), queue.as_slice()], &mut merged);
                *pending = merged;
            }

            self.time = t1;
        }
        Ok(self.time)
    }

    #[cfg(feature = "parallel")]
    fn advance_groups(
        &mut self,
        t1: f64,
        dt_max: f64,
        lanes: &[Vec<SpikeEvent>],
        requests: &[SampleRequest],
    ) -> Result<cable_group::AdvanceResult, SimulationError> {
        // A single cable group per rank; rayon carries the per-epoch task
        // when several groups exist.
        let mut results = vec![&mut self.group]
            .into_par_iter()
            .map(|group| group.advance(t1, dt_max, lanes, requests))
            .collect::<Vec<_>>();
        Ok(results.pop().expect("one group")?)
    }

    #[cfg(not(feature = "parallel"))]
    fn advance_groups(
        &mut self,
        t1: f64,
        dt_max: f64,
        lanes: &[Vec<SpikeEvent>],
        requests: &[SampleRequest],
    ) -> Result<cable_group::AdvanceResult, SimulationError> {
        Ok(self.group.advance(t1, dt_max, lanes, requests)?)
    }

    /// Restore the simulation to its initial state: voltages, mechanism
    /// state, clocks and queues. Recorded spikes and samples are cleared.
    pub fn reset(&mut self) {
        self.group.reset();
        self.communicator.reset();
        for lane in &mut self.pending {
            lane.clear();
        }
        self.records.clear();
        self.spikes.clear();
        self.time = 0.0;
    }

    /// Voltage at a location of a local cell, for tests and inspection.
    pub fn voltage_at(&self, gid: CellGid, loc: cable_morph::Location) -> Option<f64> {
        self.group.voltage_at(gid, loc)
    }

    pub fn probe_metadata(&self, probe: CellMember) -> Option<&cable_group::ProbeMetadata> {
        self.group.probe_metadata(probe)
    }

    pub fn snapshot_digest(&self) -> [u8; 32] {
        self.group.snapshot_digest()
    }

    /// Whether this rank owns the probe (resolved on the local group).
    pub fn has_probe(&self, probe: CellMember) -> bool {
        self.group.has_probe(probe)
    }
}
