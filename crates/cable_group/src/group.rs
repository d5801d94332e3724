//! The cable-cell group: construction from discretization and mechanism
//! data, and the per-epoch integration loop.

use crate::probes::{
    ProbeAddress, ProbeData, ProbeMetadata, ProbeResolution, ProbeSource, SamplePolicy,
};
use crate::shared_state::SharedState;
use crate::streams::{DeliverableEventStream, SampleEventStream, StagedEvent, StagedSample};
use crate::threshold::ThresholdWatcher;
use crate::GroupError;
use cable_cell::{check_global_properties, CableCell, GlobalProperties};
use cable_core::{CellGid, CellMember, Spike};
use cable_events::SpikeEvent;
use cable_fvm::{
    build_mechanism_data_all, discretize, CvDiscretization, CvPrefer, FvmGapJunction,
    MechanismData,
};
use cable_mech::{Catalogue, Mechanism, MechanismKind, MechanismLayout};
use cable_solver::HinesMatrix;
use std::collections::BTreeMap;

pub type SamplerId = u32;

/// One epoch's sampling demand for one probe.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub sampler: SamplerId,
    pub probe: CellMember,
    pub times: Vec<f64>,
    pub policy: SamplePolicy,
}

/// One recorded sample: scheduled (or boundary) time plus the probe's
/// values.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub sampler: SamplerId,
    pub probe: CellMember,
    pub time: f64,
    pub values: Vec<f64>,
}

/// Spikes produced by one `advance` call.
#[derive(Debug, Clone, Default)]
pub struct AdvanceResult {
    pub spikes: Vec<Spike>,
    pub samples: Vec<SampleRecord>,
}

#[derive(Debug, Clone, Copy)]
struct TargetHandle {
    mech: usize,
    mech_id: u32,
    index: u32,
    intdom: u32,
}

// Relaxation hook: gap-junction waveform relaxation would re-run the step
// loop against the previous iteration's peer voltage trace. Single-pass
// integration is the supported mode.
const WR_ITERATIONS: usize = 1;

pub struct CableCellGroup {
    gids: Vec<CellGid>,
    gid_index: BTreeMap<CellGid, usize>,
    d: CvDiscretization,
    mech_data: MechanismData,
    state: SharedState,
    matrix: HinesMatrix,
    mechanisms: Vec<Box<dyn Mechanism>>,
    regular: Vec<usize>,
    revpot: Vec<usize>,
    target_handles: Vec<TargetHandle>,
    watcher: ThresholdWatcher,
    detector_sources: Vec<CellMember>,
    events: DeliverableEventStream,
    samples: SampleEventStream,
    sample_assocs: Vec<(SamplerId, CellMember, SamplePolicy)>,
    probe_map: BTreeMap<CellMember, ProbeData>,
    check_voltage: Option<f64>,
    post_events: bool,
    spikes: Vec<Spike>,
    records: Vec<SampleRecord>,
}

impl CableCellGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cells: Vec<CableCell>,
        gids: Vec<CellGid>,
        gprop: &GlobalProperties,
        catalogue: &Catalogue,
        gj_conns: &BTreeMap<CellGid, Vec<FvmGapJunction>>,
        cv_offset: u32,
        cell_to_intdom: Vec<u32>,
        n_intdom: usize,
        probes: &BTreeMap<CellGid, Vec<ProbeAddress>>,
    ) -> Result<Self, GroupError> {
        check_global_properties(gprop)?;

        let d = discretize(&cells, gprop)?;
        let n_cv = d.size();

        // Localize gap-junction CV indices from the global map.
        let mut local_gj: Vec<Vec<FvmGapJunction>> = Vec::with_capacity(cells.len());
        for gid in &gids {
            let mut conns = gj_conns.get(gid).cloned().unwrap_or_default();
            for conn in &mut conns {
                for cv in [&mut conn.local_cv, &mut conn.peer_cv] {
                    let local = cv.checked_sub(cv_offset).filter(|&c| (c as usize) < n_cv);
                    match local {
                        Some(c) => *cv = c,
                        None => {
                            return Err(GroupError::GapJunctionOutsideGroup {
                                peer: *cv,
                                lo: cv_offset,
                                hi: cv_offset + n_cv as u32,
                            })
                        }
                    }
                }
            }
            local_gj.push(conns);
        }

        let mech_data = build_mechanism_data_all(gprop, catalogue, &cells, &local_gj, &d)?;

        let matrix = HinesMatrix::new(
            d.geometry.cv_parent.clone(),
            d.geometry.cell_cv_divs.clone(),
            d.cv_capacitance.clone(),
            d.face_conductance.clone(),
            d.cv_area.clone(),
            cell_to_intdom.clone(),
        )?;

        let mut state = SharedState::new(n_intdom, &d, cell_to_intdom);
        for (ion, config) in &mech_data.ions {
            let charge = gprop.ion_species.get(ion).copied().unwrap_or_default();
            state.add_ion(ion, charge, config);
        }
        if !mech_data.stimuli.cv.is_empty() {
            state.configure_stimulus(&mech_data.stimuli);
        }

        // Instantiate mechanisms in name order; ids follow that order.
        let mut mechanisms: Vec<Box<dyn Mechanism>> = Vec::new();
        let mut regular = Vec::new();
        let mut revpot = Vec::new();
        let mut target_handles = vec![
            TargetHandle {
                mech: usize::MAX,
                mech_id: u32::MAX,
                index: 0,
                intdom: 0,
            };
            mech_data.n_target as usize
        ];

        for (mech_id, (name, config)) in mech_data.mechanisms.iter().enumerate() {
            let mech_id = mech_id as u32;
            let info = catalogue.info(name)?;
            let width = config.cv.len();

            let mut weight = vec![0.0; width];
            match info.kind {
                MechanismKind::Point => {
                    // Point contributions are nA; 1000/area converts to A/m².
                    for (i, &cv) in config.cv.iter().enumerate() {
                        weight[i] = 1000.0 / d.cv_area[cv as usize];
                    }
                }
                MechanismKind::GapJunction => {
                    for (i, &cv) in config.cv.iter().enumerate() {
                        weight[i] = config.local_weight[i] * 1000.0 / d.cv_area[cv as usize];
                    }
                }
                MechanismKind::Density => {
                    weight.copy_from_slice(&config.norm_area);
                }
                MechanismKind::ReversalPotential => {}
            }

            let mut ion_index = BTreeMap::new();
            for ion in info.ions.keys() {
                let ion_state = state.ions.get(*ion).expect("ion instantiated for support");
                let index: Vec<u32> = config
                    .cv
                    .iter()
                    .map(|&cv| ion_state.index_of(cv).expect("mechanism CV in ion support"))
                    .collect();
                ion_index.insert(ion.to_string(), index);
            }

            let mech_vec_index = mechanisms.len();
            if info.kind == MechanismKind::Point {
                let mut k = 0usize;
                for i in 0..width {
                    let mult = config.multiplicity.get(i).copied().unwrap_or(1);
                    let handle = TargetHandle {
                        mech: mech_vec_index,
                        mech_id,
                        index: i as u32,
                        intdom: state.cv_to_intdom[config.cv[i] as usize],
                    };
                    for _ in 0..mult {
                        target_handles[config.target[k] as usize] = handle;
                        k += 1;
                    }
                }
            }

            let mut mech = catalogue.instance(name)?;
            mech.instantiate(
                mech_id,
                MechanismLayout {
                    cv: config.cv.clone(),
                    peer_cv: config.peer_cv.clone(),
                    weight,
                    multiplicity: config.multiplicity.clone(),
                    ion_index,
                },
            )?;
            for (pname, values) in &config.param_values {
                mech.set_parameter(pname, values)?;
            }

            if info.kind == MechanismKind::ReversalPotential {
                revpot.push(mech_vec_index);
            } else {
                regular.push(mech_vec_index);
            }
            mechanisms.push(mech);
        }

        // Detectors, in cell order then placement order.
        let mut detector_cv = Vec::new();
        let mut detector_threshold = Vec::new();
        let mut detector_sources = Vec::new();
        for (cell_idx, cell) in cells.iter().enumerate() {
            for placed in &cell.assignments().detectors {
                detector_cv.push(d.geometry.location_cv(cell_idx, placed.loc, CvPrefer::Empty));
                detector_threshold.push(placed.item.threshold);
                detector_sources.push(CellMember {
                    gid: gids[cell_idx],
                    lid: cable_core::CellLid(placed.lid),
                });
            }
        }
        let watcher = ThresholdWatcher::new(detector_cv, detector_threshold, &state.cv_to_intdom);

        let gid_index: BTreeMap<CellGid, usize> =
            gids.iter().enumerate().map(|(i, &g)| (g, i)).collect();

        // Resolve probe addresses now; handles stay valid for the group's
        // lifetime.
        let mech_name_index: BTreeMap<String, usize> = mech_data
            .mechanisms
            .keys()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let mut probe_map = BTreeMap::new();
        for (gid, addrs) in probes {
            let Some(&cell_idx) = gid_index.get(gid) else {
                continue;
            };
            let mech_index = |name: &str| mech_name_index.get(name).copied();
            let target_handle = |t: u32| {
                target_handles
                    .get(t as usize)
                    .filter(|h| h.mech != usize::MAX)
                    .map(|h| (h.mech, h.index))
            };
            let resolution = ProbeResolution {
                cell: &cells[cell_idx],
                cell_idx,
                d: &d,
                m: &mech_data,
                mech_index: &mech_index,
                target_handle: &target_handle,
            };
            for (lid, addr) in addrs.iter().enumerate() {
                if let Some(data) = resolution.resolve(addr) {
                    probe_map.insert(
                        CellMember {
                            gid: *gid,
                            lid: cable_core::CellLid(lid as u32),
                        },
                        data,
                    );
                }
            }
        }

        let post_events = mech_data.post_events;
        let n_intdom = state.n_intdom;
        let mut group = Self {
            gids,
            gid_index,
            d,
            mech_data,
            state,
            matrix,
            mechanisms,
            regular,
            revpot,
            target_handles,
            watcher,
            detector_sources,
            events: DeliverableEventStream::new(n_intdom),
            samples: SampleEventStream::new(n_intdom),
            sample_assocs: Vec::new(),
            probe_map,
            check_voltage: gprop.membrane_voltage_limit,
            post_events,
            spikes: Vec::new(),
            records: Vec::new(),
        };
        group.reset();
        Ok(group)
    }

    pub fn num_cells(&self) -> usize {
        self.gids.len()
    }

    pub fn gids(&self) -> &[CellGid] {
        &self.gids
    }

    pub fn num_cvs(&self) -> usize {
        self.d.size()
    }

    pub fn time(&self) -> f64 {
        self.state.time_bounds().0
    }

    pub fn discretization(&self) -> &CvDiscretization {
        &self.d
    }

    /// Group-wide target count, for connection resolution.
    pub fn num_targets(&self) -> u32 {
        self.mech_data.n_target
    }

    pub fn probe_metadata(&self, probe: CellMember) -> Option<&ProbeMetadata> {
        self.probe_map.get(&probe).map(|p| &p.metadata)
    }

    pub fn has_probe(&self, probe: CellMember) -> bool {
        self.probe_map.contains_key(&probe)
    }

    /// Restore voltages, mechanism state and the threshold watcher to their
    /// initial values; pending events, spikes and samples are dropped.
    pub fn reset(&mut self) {
        self.state.reset();

        let ctx_pass = |state: &mut SharedState,
                        mechanisms: &mut Vec<Box<dyn Mechanism>>,
                        revpot: &[usize],
                        regular: &[usize]| {
            let mut ctx = state.mech_ctx();
            for &i in revpot {
                mechanisms[i].initialize(&mut ctx);
            }
            for &i in regular {
                mechanisms[i].initialize(&mut ctx);
            }
        };

        ctx_pass(
            &mut self.state,
            &mut self.mechanisms,
            &self.revpot,
            &self.regular,
        );
        self.update_ion_state();
        self.state.zero_currents();
        // Mechanisms may read ion state during initialization, so run it
        // again after the ion update.
        ctx_pass(
            &mut self.state,
            &mut self.mechanisms,
            &self.revpot,
            &self.regular,
        );

        self.watcher.reset(&self.state.voltage);
        self.events = DeliverableEventStream::new(self.state.n_intdom);
        self.samples = SampleEventStream::new(self.state.n_intdom);
        self.spikes.clear();
        self.records.clear();
    }

    fn update_ion_state(&mut self) {
        self.state.ions_init_concentration();
        let mut ctx = self.state.mech_ctx();
        for &i in &self.regular {
            self.mechanisms[i].update_ions(&mut ctx);
        }
    }

    /// Advance all cells to `t_final`. `event_lanes` holds this epoch's
    /// deliverable events per cell (sorted by time); `sample_requests` the
    /// sampling demand within the epoch window.
    pub fn advance(
        &mut self,
        t_final: f64,
        dt_max: f64,
        event_lanes: &[Vec<SpikeEvent>],
        sample_requests: &[SampleRequest],
    ) -> Result<AdvanceResult, GroupError> {
        if dt_max <= 0.0 {
            return Err(GroupError::BadDtMax(dt_max));
        }
        if self.gids.is_empty() {
            return Ok(AdvanceResult::default());
        }
        self.watcher.clear_crossings();
        self.spikes.clear();
        self.records.clear();

        // Stage events, resolving target lids to handles.
        let mut staged = Vec::new();
        for (cell_idx, lane) in event_lanes.iter().enumerate() {
            let base = self.mech_data.target_divs[cell_idx];
            for ev in lane {
                let Some(handle) = self
                    .target_handles
                    .get((base + ev.target.0) as usize)
                    .filter(|h| h.mech != usize::MAX)
                else {
                    log::warn!(
                        "dropping event for unresolved target {} on cell index {}",
                        ev.target.0,
                        cell_idx
                    );
                    continue;
                };
                staged.push(StagedEvent {
                    time: ev.time,
                    weight: ev.weight,
                    mech_id: handle.mech_id,
                    mech_index: handle.index,
                    intdom: handle.intdom,
                });
            }
        }
        self.events.init(staged);

        // Stage samples. Requests for cells owned elsewhere are not ours to
        // serve; a request for a local cell without the probe is an error.
        self.sample_assocs.clear();
        let mut staged_samples = Vec::new();
        for req in sample_requests {
            let Some(&cell_idx) = self.gid_index.get(&req.probe.gid) else {
                continue;
            };
            if !self.probe_map.contains_key(&req.probe) {
                return Err(GroupError::NoSuchProbe {
                    gid: req.probe.gid.0,
                    lid: req.probe.lid.0,
                });
            }
            let assoc = self.sample_assocs.len() as u32;
            self.sample_assocs
                .push((req.sampler, req.probe, req.policy));
            let intdom = self.state.cell_to_intdom[cell_idx];
            for &t in &req.times {
                staged_samples.push(StagedSample {
                    time: t,
                    intdom,
                    assoc,
                    exact: req.policy == SamplePolicy::Exact,
                });
            }
        }
        self.samples.init(staged_samples);

        let (t0, t1) = self.state.time_bounds();
        if t0 != t1 {
            return Err(GroupError::InconsistentTime);
        }

        debug_assert_eq!(WR_ITERATIONS, 1);
        while self.state.time_bounds().0 < t_final {
            self.step(t_final, dt_max)?;
        }

        let (t0, t1) = self.state.time_bounds();
        if t0 != t1 {
            return Err(GroupError::InconsistentTime);
        }

        for crossing in self.watcher.crossings() {
            self.spikes.push(Spike {
                source: self.detector_sources[crossing.index as usize],
                time: crossing.time,
            });
        }

        Ok(AdvanceResult {
            spikes: self.spikes.clone(),
            samples: std::mem::take(&mut self.records),
        })
    }

    fn step(&mut self, t_final: f64, dt_max: f64) -> Result<(), GroupError> {
        // 1. Reversal potentials from current ionic concentrations.
        {
            let mut ctx = self.state.mech_ctx();
            for &i in &self.revpot {
                self.mechanisms[i].update_current(&mut ctx);
            }
        }

        // 2. Mark deliverable events, zero accumulators.
        self.events.mark_until_after(&self.state.time);
        self.state.zero_currents();

        // 3. Deliver events and accumulate currents.
        {
            let marked = self.events.marked_events();
            let mut ctx = self.state.mech_ctx();
            for &i in &self.regular {
                self.mechanisms[i].deliver_events(&marked);
                self.mechanisms[i].update_current(&mut ctx);
            }
        }
        self.events.drop_marked_events();

        // 4. Step times: dt_max and epoch end, clipped by pending events and
        // exact samples.
        self.state.update_time_to(dt_max, t_final);
        self.events.event_time_if_before(&mut self.state.time_to);
        self.samples
            .exact_time_if_before(&self.state.time, &mut self.state.time_to);
        self.state.set_dt();

        // 5. Stimulus contributions.
        self.state.add_stimulus_current();

        // 6. Samples scheduled within this step.
        self.samples.mark_until(&self.state.time_to);
        let marked: Vec<StagedSample> = self.samples.marked_events().copied().collect();
        for ev in marked {
            let (sampler, probe, policy) = self.sample_assocs[ev.assoc as usize];
            let values = self.eval_probe(&probe);
            let time = match policy {
                SamplePolicy::Exact => ev.time,
                SamplePolicy::Lax => self.state.time[ev.intdom as usize],
            };
            self.records.push(SampleRecord {
                sampler,
                probe,
                time,
                values,
            });
        }
        self.samples.drop_marked_events();

        // 7. Matrix assemble and solve.
        self.matrix.assemble(
            &self.state.dt_intdom,
            &self.state.voltage,
            &self.state.current_density,
            &self.state.conductivity,
        );
        self.matrix.solve(&mut self.state.voltage);

        // 8. Mechanism state integration.
        {
            let mut ctx = self.state.mech_ctx();
            for &i in &self.regular {
                self.mechanisms[i].update_state(&mut ctx);
            }
        }

        // 9. Ion concentrations.
        self.update_ion_state();

        // 10. Threshold detection over [time, time_to).
        self.watcher
            .test(&self.state.time, &self.state.time_to, &self.state.voltage);

        // 11. Post-event hooks.
        if self.post_events {
            let mut ctx = self.state.mech_ctx();
            for &i in &self.regular {
                self.mechanisms[i].post_event(&mut ctx);
            }
        }

        // 12. Non-physical solution check.
        if let Some(bound) = self.check_voltage {
            let (lo, hi) = self.state.voltage_bounds();
            if lo < -bound || hi > bound {
                let value = if lo < -bound { lo } else { hi };
                let (t0, t1) = (self.state.time_bounds().0, self.state.time_to[0]);
                return Err(GroupError::VoltageOutOfBounds { t0, t1, value });
            }
        }

        // 13. Commit step times.
        std::mem::swap(&mut self.state.time, &mut self.state.time_to);
        Ok(())
    }

    fn eval_probe(&self, probe: &CellMember) -> Vec<f64> {
        let Some(data) = self.probe_map.get(probe) else {
            return Vec::new();
        };
        data.terms
            .iter()
            .map(|sum| {
                sum.iter()
                    .map(|(source, coef)| coef * self.read_source(source))
                    .sum()
            })
            .collect()
    }

    fn read_source(&self, source: &ProbeSource) -> f64 {
        match source {
            ProbeSource::Voltage(cv) => self.state.voltage[*cv as usize],
            ProbeSource::CurrentDensity(cv) => self.state.current_density[*cv as usize],
            ProbeSource::StimAccu(j) => self.state.stim.accu_stim[*j as usize],
            ProbeSource::IonCurrent { ion, index } => self.state.ions[ion].ix[*index as usize],
            ProbeSource::IonInt { ion, index } => self.state.ions[ion].xi[*index as usize],
            ProbeSource::IonExt { ion, index } => self.state.ions[ion].xo[*index as usize],
            ProbeSource::MechState { mech, var, col } => self.mechanisms[*mech]
                .state_values(var)
                .map(|s| s[*col as usize])
                .unwrap_or(0.0),
        }
    }

    /// Voltage of the CV at a location of a cell, mostly for tests.
    pub fn voltage_at(&self, gid: CellGid, loc: cable_morph::Location) -> Option<f64> {
        let &cell_idx = self.gid_index.get(&gid)?;
        let cv = self
            .d
            .geometry
            .location_cv(cell_idx, loc, CvPrefer::Nonempty);
        Some(self.state.voltage[cv as usize])
    }

    /// Digest over the group's dynamic state, for determinism checks.
    pub fn snapshot_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:GROUP:SNAP");
        for &t in &self.state.time {
            hasher.update(&t.to_bits().to_le_bytes());
        }
        for &v in &self.state.voltage {
            hasher.update(&v.to_bits().to_le_bytes());
        }
        for (name, ion) in &self.state.ions {
            hasher.update(name.as_bytes());
            for vals in [&ion.xi, &ion.xo, &ion.ex] {
                for &x in vals.iter() {
                    hasher.update(&x.to_bits().to_le_bytes());
                }
            }
        }
        for mech in &self.mechanisms {
            let state_vars: Vec<&'static str> = mech.info().state.clone();
            hasher.update(mech.info().name.as_bytes());
            for var in state_vars {
                if let Some(values) = mech.state_values(var) {
                    for &x in values {
                        hasher.update(&x.to_bits().to_le_bytes());
                    }
                }
            }
        }
        *hasher.finalize().as_bytes()
    }

}
