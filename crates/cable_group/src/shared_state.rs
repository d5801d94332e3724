//! Shared per-group state: dense per-CV vectors, per-intdom time keeping,
//! ion states and the stimulus table. Mutated only by the thread advancing
//! the owning cell group.

use cable_fvm::{CvDiscretization, IonConfig, StimulusConfig};
use cable_mech::{IonView, MechCtx};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct IonState {
    pub charge: i32,
    /// Sorted global CV indices of this ion's support.
    pub cv: Vec<u32>,
    pub xi: Vec<f64>,
    pub xo: Vec<f64>,
    pub ix: Vec<f64>,
    pub ex: Vec<f64>,
    init_iconc: Vec<f64>,
    init_econc: Vec<f64>,
    reset_iconc: Vec<f64>,
    reset_econc: Vec<f64>,
    init_revpot: Vec<f64>,
    pub iconc_written: bool,
    pub econc_written: bool,
    pub revpot_written: bool,
}

impl IonState {
    fn new(charge: i32, config: &IonConfig) -> Self {
        let n = config.cv.len();
        Self {
            charge,
            cv: config.cv.clone(),
            xi: vec![0.0; n],
            xo: vec![0.0; n],
            ix: vec![0.0; n],
            ex: vec![0.0; n],
            init_iconc: config.init_iconc.clone(),
            init_econc: config.init_econc.clone(),
            reset_iconc: config.reset_iconc.clone(),
            reset_econc: config.reset_econc.clone(),
            init_revpot: config.init_revpot.clone(),
            iconc_written: config.iconc_written,
            econc_written: config.econc_written,
            revpot_written: config.revpot_written,
        }
    }

    fn reset(&mut self) {
        self.xi.copy_from_slice(&self.reset_iconc);
        self.xo.copy_from_slice(&self.reset_econc);
        self.ex.copy_from_slice(&self.init_revpot);
        self.ix.iter_mut().for_each(|x| *x = 0.0);
    }

    /// Offset of a CV in this ion's arrays.
    pub fn index_of(&self, cv: u32) -> Option<u32> {
        self.cv.binary_search(&cv).ok().map(|i| i as u32)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StimulusState {
    cv: Vec<u32>,
    cv_unique: Vec<u32>,
    frequency: Vec<f64>,
    phase: Vec<f64>,
    envelope_time: Vec<Vec<f64>>,
    envelope_amplitude: Vec<Vec<f64>>,
    /// Accumulated stimulus current density per unique CV, for probes.
    pub accu_stim: Vec<f64>,
}

impl StimulusState {
    fn new(config: &StimulusConfig) -> Self {
        Self {
            cv: config.cv.clone(),
            cv_unique: config.cv_unique.clone(),
            frequency: config.frequency.clone(),
            phase: config.phase.clone(),
            envelope_time: config.envelope_time.clone(),
            envelope_amplitude: config.envelope_amplitude.clone(),
            accu_stim: vec![0.0; config.cv_unique.len()],
        }
    }

    pub fn accu_index(&self, cv: u32) -> Option<u32> {
        self.cv_unique.binary_search(&cv).ok().map(|i| i as u32)
    }

    fn envelope_at(&self, i: usize, t: f64) -> f64 {
        let times = &self.envelope_time[i];
        let amps = &self.envelope_amplitude[i];
        if times.is_empty() || t < times[0] {
            return 0.0;
        }
        let k = times.partition_point(|&x| x <= t);
        if k >= times.len() {
            return *amps.last().unwrap();
        }
        let (t0, t1) = (times[k - 1], times[k]);
        let (a0, a1) = (amps[k - 1], amps[k]);
        if t1 <= t0 {
            a0
        } else {
            a0 + (a1 - a0) * (t - t0) / (t1 - t0)
        }
    }
}

/// Dense state shared by all mechanisms of one cell group.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub n_intdom: usize,
    pub voltage: Vec<f64>,
    pub current_density: Vec<f64>,
    pub conductivity: Vec<f64>,
    pub cv_area: Vec<f64>,
    pub cv_capacitance: Vec<f64>,
    pub temperature: Vec<f64>,
    pub init_voltage: Vec<f64>,
    /// Per intdom.
    pub time: Vec<f64>,
    pub time_to: Vec<f64>,
    pub dt_intdom: Vec<f64>,
    /// Per CV.
    pub dt_cv: Vec<f64>,
    pub cv_to_intdom: Vec<u32>,
    pub cv_to_cell: Vec<u32>,
    pub cell_to_intdom: Vec<u32>,
    pub ions: BTreeMap<String, IonState>,
    pub stim: StimulusState,
}

impl SharedState {
    pub fn new(
        n_intdom: usize,
        d: &CvDiscretization,
        cell_to_intdom: Vec<u32>,
    ) -> Self {
        let n_cv = d.size();
        let cv_to_cell = d.geometry.cv_to_cell.clone();
        let cv_to_intdom: Vec<u32> = cv_to_cell
            .iter()
            .map(|&c| cell_to_intdom[c as usize])
            .collect();
        Self {
            n_intdom,
            voltage: d.init_membrane_potential.clone(),
            current_density: vec![0.0; n_cv],
            conductivity: vec![0.0; n_cv],
            cv_area: d.cv_area.clone(),
            cv_capacitance: d.cv_capacitance.clone(),
            temperature: d.temperature.clone(),
            init_voltage: d.init_membrane_potential.clone(),
            time: vec![0.0; n_intdom],
            time_to: vec![0.0; n_intdom],
            dt_intdom: vec![0.0; n_intdom],
            dt_cv: vec![0.0; n_cv],
            cv_to_intdom,
            cv_to_cell,
            cell_to_intdom,
            ions: BTreeMap::new(),
            stim: StimulusState::default(),
        }
    }

    pub fn add_ion(&mut self, name: &str, charge: i32, config: &IonConfig) {
        self.ions
            .insert(name.to_string(), IonState::new(charge, config));
    }

    pub fn configure_stimulus(&mut self, config: &StimulusConfig) {
        self.stim = StimulusState::new(config);
    }

    pub fn reset(&mut self) {
        self.voltage.copy_from_slice(&self.init_voltage);
        self.time.iter_mut().for_each(|t| *t = 0.0);
        self.time_to.iter_mut().for_each(|t| *t = 0.0);
        self.dt_intdom.iter_mut().for_each(|t| *t = 0.0);
        self.dt_cv.iter_mut().for_each(|t| *t = 0.0);
        self.zero_currents();
        for ion in self.ions.values_mut() {
            ion.reset();
        }
    }

    pub fn zero_currents(&mut self) {
        self.current_density.iter_mut().for_each(|x| *x = 0.0);
        self.conductivity.iter_mut().for_each(|x| *x = 0.0);
        for ion in self.ions.values_mut() {
            ion.ix.iter_mut().for_each(|x| *x = 0.0);
        }
        self.stim.accu_stim.iter_mut().for_each(|x| *x = 0.0);
    }

    pub fn update_time_to(&mut self, dt_max: f64, t_final: f64) {
        for i in 0..self.n_intdom {
            self.time_to[i] = (self.time[i] + dt_max).min(t_final).max(self.time[i]);
        }
    }

    pub fn set_dt(&mut self) {
        for i in 0..self.n_intdom {
            self.dt_intdom[i] = self.time_to[i] - self.time[i];
        }
        for cv in 0..self.dt_cv.len() {
            self.dt_cv[cv] = self.dt_intdom[self.cv_to_intdom[cv] as usize];
        }
    }

    /// Evaluate stimuli at the current intdom times and subtract the
    /// injected current from the accumulated current density.
    pub fn add_stimulus_current(&mut self) {
        for i in 0..self.stim.cv.len() {
            let cv = self.stim.cv[i] as usize;
            let t = self.time[self.cv_to_intdom[cv] as usize];
            let mut f = self.stim.envelope_at(i, t);
            if f == 0.0 {
                continue;
            }
            if self.stim.frequency[i] > 0.0 {
                f *= (2.0 * std::f64::consts::PI * self.stim.frequency[i] * t
                    + self.stim.phase[i])
                    .sin();
            }
            let j = self
                .stim
                .accu_index(self.stim.cv[i])
                .expect("stimulus CV present in unique list") as usize;
            self.stim.accu_stim[j] += f;
            self.current_density[cv] -= f;
        }
    }

    /// Restore written ion concentrations to their per-step initial values
    /// before mechanisms accumulate writes.
    pub fn ions_init_concentration(&mut self) {
        for ion in self.ions.values_mut() {
            if ion.iconc_written {
                ion.xi.copy_from_slice(&ion.init_iconc);
            }
            if ion.econc_written {
                ion.xo.copy_from_slice(&ion.init_econc);
            }
        }
    }

    pub fn time_bounds(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &t in &self.time {
            lo = lo.min(t);
            hi = hi.max(t);
        }
        if self.time.is_empty() {
            (0.0, 0.0)
        } else {
            (lo, hi)
        }
    }

    pub fn voltage_bounds(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in &self.voltage {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        (lo, hi)
    }

    /// Borrow the state as a mechanism call context.
    pub fn mech_ctx(&mut self) -> MechCtx<'_> {
        let ions = self
            .ions
            .iter_mut()
            .map(|(name, ion)| {
                (
                    name.clone(),
                    IonView {
                        charge: ion.charge,
                        xi: &mut ion.xi,
                        xo: &mut ion.xo,
                        ix: &mut ion.ix,
                        ex: &mut ion.ex,
                    },
                )
            })
            .collect();
        MechCtx {
            voltage: &self.voltage,
            current_density: &mut self.current_density,
            conductivity: &mut self.conductivity,
            temperature: &self.temperature,
            dt_cv: &self.dt_cv,
            ions,
        }
    }
}
