//! Built-in mechanisms: `pas`, `hh` (densities), `expsyn`, `exp2syn`
//! (points), `gj` (gap junction) and `nernst/<ion>` (reversal potential),
//! plus the `cad` calcium decay model exercising ion concentration writes.

use crate::{
    Deliverable, IonDep, MechCtx, Mechanism, MechanismError, MechanismInfo, MechanismKind,
    MechanismLayout, ParamSpec,
};
use std::collections::BTreeMap;

const FARADAY: f64 = 96485.33212331001;
const GAS_CONSTANT: f64 = 8.31446261815324;

// Density conductances are declared in S/cm²; A/m² per mV needs a factor 10.
const DENSITY_CURRENT_SCALE: f64 = 10.0;

fn check_column(
    info: &MechanismInfo,
    name: &str,
    values: &[f64],
    width: usize,
) -> Result<(), MechanismError> {
    let spec = info
        .param(name)
        .ok_or_else(|| MechanismError::UnknownParameter {
            mech: info.name.to_string(),
            param: name.to_string(),
        })?;
    if values.len() != width {
        return Err(MechanismError::ParameterWidth {
            mech: info.name.to_string(),
            param: name.to_string(),
            got: values.len(),
            width,
        });
    }
    for &v in values {
        if !spec.valid(v) {
            return Err(MechanismError::InvalidParameterValue {
                mech: info.name.to_string(),
                param: name.to_string(),
                value: v,
                min: spec.min,
                max: spec.max,
            });
        }
    }
    Ok(())
}

fn ion_column<'a>(
    layout: &'a MechanismLayout,
    info: &MechanismInfo,
    ion: &str,
) -> Result<&'a [u32], MechanismError> {
    layout
        .ion_index
        .get(ion)
        .map(Vec::as_slice)
        .ok_or_else(|| MechanismError::MissingIonBinding {
            mech: info.name.to_string(),
            ion: ion.to_string(),
        })
}

// ---------------------------------------------------------------------
// pas: passive leak density.

#[derive(Debug)]
pub struct Pas {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    g: Vec<f64>,
    e: Vec<f64>,
}

impl Pas {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("g", ParamSpec::nonnegative(0.001, "S/cm²"));
        parameters.insert("e", ParamSpec::unbounded(-65.0, "mV"));
        Self {
            info: MechanismInfo {
                name: "pas",
                kind: MechanismKind::Density,
                parameters,
                state: vec![],
                ions: BTreeMap::new(),
                linear: false,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            g: Vec::new(),
            e: Vec::new(),
        }
    }
}

impl Default for Pas {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for Pas {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        self.g = crate::param_column(&self.info.parameters["g"], width);
        self.e = crate::param_column(&self.info.parameters["e"], width);
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "g" => self.g.copy_from_slice(values),
            "e" => self.e.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut MechCtx) {}

    fn update_current(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let w = self.layout.weight[i];
            let g = DENSITY_CURRENT_SCALE * self.g[i];
            ctx.current_density[cv] += w * g * (ctx.voltage[cv] - self.e[i]);
            ctx.conductivity[cv] += w * g;
        }
    }

    fn update_state(&mut self, _ctx: &mut MechCtx) {}

    fn state_values(&self, _var: &str) -> Option<&[f64]> {
        None
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// hh: classic Hodgkin-Huxley sodium/potassium/leak density.

#[derive(Debug)]
pub struct Hh {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    gnabar: Vec<f64>,
    gkbar: Vec<f64>,
    gl: Vec<f64>,
    el: Vec<f64>,
    m: Vec<f64>,
    h: Vec<f64>,
    n: Vec<f64>,
}

// x/(exp(x/y) - 1) with the singularity filled by its limit expansion.
fn vtrap(x: f64, y: f64) -> f64 {
    if (x / y).abs() < 1e-6 {
        y * (1.0 - x / y / 2.0)
    } else {
        x / ((x / y).exp() - 1.0)
    }
}

struct HhRates {
    m_inf: f64,
    m_tau: f64,
    h_inf: f64,
    h_tau: f64,
    n_inf: f64,
    n_tau: f64,
}

fn hh_rates(v: f64, temperature_k: f64) -> HhRates {
    let celsius = temperature_k - 273.15;
    let q10 = 3f64.powf((celsius - 6.3) / 10.0);

    let alpha_m = 0.1 * vtrap(-(v + 40.0), 10.0);
    let beta_m = 4.0 * (-(v + 65.0) / 18.0).exp();
    let alpha_h = 0.07 * (-(v + 65.0) / 20.0).exp();
    let beta_h = 1.0 / (1.0 + (-(v + 35.0) / 10.0).exp());
    let alpha_n = 0.01 * vtrap(-(v + 55.0), 10.0);
    let beta_n = 0.125 * (-(v + 65.0) / 80.0).exp();

    let sum_m = alpha_m + beta_m;
    let sum_h = alpha_h + beta_h;
    let sum_n = alpha_n + beta_n;
    HhRates {
        m_inf: alpha_m / sum_m,
        m_tau: 1.0 / (q10 * sum_m),
        h_inf: alpha_h / sum_h,
        h_tau: 1.0 / (q10 * sum_h),
        n_inf: alpha_n / sum_n,
        n_tau: 1.0 / (q10 * sum_n),
    }
}

impl Hh {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("gnabar", ParamSpec::nonnegative(0.12, "S/cm²"));
        parameters.insert("gkbar", ParamSpec::nonnegative(0.036, "S/cm²"));
        parameters.insert("gl", ParamSpec::nonnegative(0.0003, "S/cm²"));
        parameters.insert("el", ParamSpec::unbounded(-54.3, "mV"));
        let mut ions = BTreeMap::new();
        ions.insert(
            "na",
            IonDep {
                read_reversal_potential: true,
                ..IonDep::default()
            },
        );
        ions.insert(
            "k",
            IonDep {
                read_reversal_potential: true,
                ..IonDep::default()
            },
        );
        Self {
            info: MechanismInfo {
                name: "hh",
                kind: MechanismKind::Density,
                parameters,
                state: vec!["m", "h", "n"],
                ions,
                linear: false,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            gnabar: Vec::new(),
            gkbar: Vec::new(),
            gl: Vec::new(),
            el: Vec::new(),
            m: Vec::new(),
            h: Vec::new(),
            n: Vec::new(),
        }
    }
}

impl Default for Hh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for Hh {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        ion_column(&layout, &self.info, "na")?;
        ion_column(&layout, &self.info, "k")?;
        self.gnabar = crate::param_column(&self.info.parameters["gnabar"], width);
        self.gkbar = crate::param_column(&self.info.parameters["gkbar"], width);
        self.gl = crate::param_column(&self.info.parameters["gl"], width);
        self.el = crate::param_column(&self.info.parameters["el"], width);
        self.m = vec![0.0; width];
        self.h = vec![0.0; width];
        self.n = vec![0.0; width];
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "gnabar" => self.gnabar.copy_from_slice(values),
            "gkbar" => self.gkbar.copy_from_slice(values),
            "gl" => self.gl.copy_from_slice(values),
            "el" => self.el.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let rates = hh_rates(ctx.voltage[cv], ctx.temperature[cv]);
            self.m[i] = rates.m_inf;
            self.h[i] = rates.h_inf;
            self.n[i] = rates.n_inf;
        }
    }

    fn update_current(&mut self, ctx: &mut MechCtx) {
        let na_index = &self.layout.ion_index["na"];
        let k_index = &self.layout.ion_index["k"];
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let v = ctx.voltage[cv];
            let w = self.layout.weight[i];

            let ena = ctx.ions["na"].ex[na_index[i] as usize];
            let ek = ctx.ions["k"].ex[k_index[i] as usize];

            let m3h = self.m[i] * self.m[i] * self.m[i] * self.h[i];
            let n4 = self.n[i] * self.n[i] * self.n[i] * self.n[i];

            let gna = DENSITY_CURRENT_SCALE * self.gnabar[i] * m3h;
            let gk = DENSITY_CURRENT_SCALE * self.gkbar[i] * n4;
            let gl = DENSITY_CURRENT_SCALE * self.gl[i];

            let ina = gna * (v - ena);
            let ik = gk * (v - ek);
            let il = gl * (v - self.el[i]);

            ctx.current_density[cv] += w * (ina + ik + il);
            ctx.conductivity[cv] += w * (gna + gk + gl);

            if let Some(na) = ctx.ions.get_mut("na") {
                na.ix[na_index[i] as usize] += w * ina;
            }
            if let Some(k) = ctx.ions.get_mut("k") {
                k.ix[k_index[i] as usize] += w * ik;
            }
        }
    }

    fn update_state(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let dt = ctx.dt_cv[cv];
            if dt <= 0.0 {
                continue;
            }
            let rates = hh_rates(ctx.voltage[cv], ctx.temperature[cv]);
            self.m[i] += (rates.m_inf - self.m[i]) * (1.0 - (-dt / rates.m_tau).exp());
            self.h[i] += (rates.h_inf - self.h[i]) * (1.0 - (-dt / rates.h_tau).exp());
            self.n[i] += (rates.n_inf - self.n[i]) * (1.0 - (-dt / rates.n_tau).exp());
        }
    }

    fn state_values(&self, var: &str) -> Option<&[f64]> {
        match var {
            "m" => Some(&self.m),
            "h" => Some(&self.h),
            "n" => Some(&self.n),
            _ => None,
        }
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// expsyn: single-exponential conductance synapse.

#[derive(Debug)]
pub struct ExpSyn {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    tau: Vec<f64>,
    e: Vec<f64>,
    g: Vec<f64>,
}

impl ExpSyn {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("tau", ParamSpec::new(2.0, 1e-9, f64::INFINITY, "ms"));
        parameters.insert("e", ParamSpec::unbounded(0.0, "mV"));
        Self {
            info: MechanismInfo {
                name: "expsyn",
                kind: MechanismKind::Point,
                parameters,
                state: vec!["g"],
                ions: BTreeMap::new(),
                linear: true,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            tau: Vec::new(),
            e: Vec::new(),
            g: Vec::new(),
        }
    }
}

impl Default for ExpSyn {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for ExpSyn {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        self.tau = crate::param_column(&self.info.parameters["tau"], width);
        self.e = crate::param_column(&self.info.parameters["e"], width);
        self.g = vec![0.0; width];
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "tau" => self.tau.copy_from_slice(values),
            "e" => self.e.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut MechCtx) {
        self.g.iter_mut().for_each(|g| *g = 0.0);
    }

    fn deliver_events(&mut self, events: &[Deliverable]) {
        for ev in events {
            if ev.mech_id == self.id {
                self.g[ev.index as usize] += ev.weight;
            }
        }
    }

    fn update_current(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let w = self.layout.weight[i];
            ctx.current_density[cv] += w * self.g[i] * (ctx.voltage[cv] - self.e[i]);
            ctx.conductivity[cv] += w * self.g[i];
        }
    }

    fn update_state(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let dt = ctx.dt_cv[cv as usize];
            if dt > 0.0 {
                self.g[i] *= (-dt / self.tau[i]).exp();
            }
        }
    }

    fn state_values(&self, var: &str) -> Option<&[f64]> {
        (var == "g").then_some(self.g.as_slice())
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// exp2syn: double-exponential conductance synapse.

#[derive(Debug)]
pub struct Exp2Syn {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    tau1: Vec<f64>,
    tau2: Vec<f64>,
    e: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    factor: Vec<f64>,
}

impl Exp2Syn {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("tau1", ParamSpec::new(0.5, 1e-9, f64::INFINITY, "ms"));
        parameters.insert("tau2", ParamSpec::new(2.0, 1e-9, f64::INFINITY, "ms"));
        parameters.insert("e", ParamSpec::unbounded(0.0, "mV"));
        Self {
            info: MechanismInfo {
                name: "exp2syn",
                kind: MechanismKind::Point,
                parameters,
                state: vec!["A", "B"],
                ions: BTreeMap::new(),
                linear: true,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            tau1: Vec::new(),
            tau2: Vec::new(),
            e: Vec::new(),
            a: Vec::new(),
            b: Vec::new(),
            factor: Vec::new(),
        }
    }
}

impl Default for Exp2Syn {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for Exp2Syn {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        self.tau1 = crate::param_column(&self.info.parameters["tau1"], width);
        self.tau2 = crate::param_column(&self.info.parameters["tau2"], width);
        self.e = crate::param_column(&self.info.parameters["e"], width);
        self.a = vec![0.0; width];
        self.b = vec![0.0; width];
        self.factor = vec![0.0; width];
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "tau1" => self.tau1.copy_from_slice(values),
            "tau2" => self.tau2.copy_from_slice(values),
            "e" => self.e.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut MechCtx) {
        for i in 0..self.width() {
            self.a[i] = 0.0;
            self.b[i] = 0.0;
            // Normalization so a unit event yields a peak conductance of 1.
            let tau1 = self.tau1[i].min(self.tau2[i] - 1e-9);
            let tau2 = self.tau2[i];
            let tp = tau1 * tau2 / (tau2 - tau1) * (tau2 / tau1).ln();
            self.factor[i] = 1.0 / (-(-tp / tau1).exp() + (-tp / tau2).exp());
        }
    }

    fn deliver_events(&mut self, events: &[Deliverable]) {
        for ev in events {
            if ev.mech_id == self.id {
                let i = ev.index as usize;
                self.a[i] += ev.weight * self.factor[i];
                self.b[i] += ev.weight * self.factor[i];
            }
        }
    }

    fn update_current(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let w = self.layout.weight[i];
            let g = self.b[i] - self.a[i];
            ctx.current_density[cv] += w * g * (ctx.voltage[cv] - self.e[i]);
            ctx.conductivity[cv] += w * g;
        }
    }

    fn update_state(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let dt = ctx.dt_cv[cv as usize];
            if dt > 0.0 {
                self.a[i] *= (-dt / self.tau1[i]).exp();
                self.b[i] *= (-dt / self.tau2[i]).exp();
            }
        }
    }

    fn state_values(&self, var: &str) -> Option<&[f64]> {
        match var {
            "A" => Some(&self.a),
            "B" => Some(&self.b),
            _ => None,
        }
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// gj: linear gap junction.

#[derive(Debug)]
pub struct GapJunction {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    g: Vec<f64>,
}

impl GapJunction {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("g", ParamSpec::nonnegative(1.0, "µS"));
        Self {
            info: MechanismInfo {
                name: "gj",
                kind: MechanismKind::GapJunction,
                parameters,
                state: vec![],
                ions: BTreeMap::new(),
                linear: true,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            g: Vec::new(),
        }
    }
}

impl Default for GapJunction {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for GapJunction {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        self.g = crate::param_column(&self.info.parameters["g"], width);
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "g" => self.g.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut MechCtx) {}

    fn update_current(&mut self, ctx: &mut MechCtx) {
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let peer = self.layout.peer_cv[i] as usize;
            let w = self.layout.weight[i];
            ctx.current_density[cv] += w * self.g[i] * (ctx.voltage[cv] - ctx.voltage[peer]);
            ctx.conductivity[cv] += w * self.g[i];
        }
    }

    fn update_state(&mut self, _ctx: &mut MechCtx) {}

    fn state_values(&self, _var: &str) -> Option<&[f64]> {
        None
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// nernst: reversal potential from the Nernst equation.

#[derive(Debug)]
pub struct Nernst {
    info: MechanismInfo,
    ion: &'static str,
    id: u32,
    layout: MechanismLayout,
}

impl Nernst {
    pub fn new(ion: &'static str) -> Result<Self, MechanismError> {
        let name: &'static str = match ion {
            "na" => "nernst/na",
            "k" => "nernst/k",
            "ca" => "nernst/ca",
            other => {
                return Err(MechanismError::UnknownMechanism(format!("nernst/{other}")))
            }
        };
        let mut ions = BTreeMap::new();
        ions.insert(
            ion,
            IonDep {
                read_concentration: true,
                write_reversal_potential: true,
                ..IonDep::default()
            },
        );
        Ok(Self {
            info: MechanismInfo {
                name,
                kind: MechanismKind::ReversalPotential,
                parameters: BTreeMap::new(),
                state: vec![],
                ions,
                linear: false,
                post_events: false,
            },
            ion,
            id: 0,
            layout: MechanismLayout::default(),
        })
    }
}

impl Mechanism for Nernst {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        ion_column(&layout, &self.info, self.ion)?;
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, _values: &[f64]) -> Result<(), MechanismError> {
        Err(MechanismError::UnknownParameter {
            mech: self.info.name.to_string(),
            param: name.to_string(),
        })
    }

    fn initialize(&mut self, ctx: &mut MechCtx) {
        // Reversal potentials must be valid before the first current update.
        self.update_current(ctx);
    }

    fn update_current(&mut self, ctx: &mut MechCtx) {
        let index = &self.layout.ion_index[self.ion];
        let Some(ion) = ctx.ions.get_mut(self.ion) else {
            return;
        };
        let z = f64::from(ion.charge);
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let t = ctx.temperature[cv as usize];
            let j = index[i] as usize;
            // e = RT/zF · ln(Xo/Xi), in mV.
            ion.ex[j] = 1e3 * GAS_CONSTANT * t / (z * FARADAY) * (ion.xo[j] / ion.xi[j]).ln();
        }
    }

    fn update_state(&mut self, _ctx: &mut MechCtx) {}

    fn state_values(&self, _var: &str) -> Option<&[f64]> {
        None
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

// ---------------------------------------------------------------------
// cad: calcium shell with first-order decay, writes [Ca]i.

#[derive(Debug)]
pub struct IonDecay {
    info: MechanismInfo,
    id: u32,
    layout: MechanismLayout,
    taur: Vec<f64>,
    cainf: Vec<f64>,
    depth: Vec<f64>,
}

impl IonDecay {
    pub fn new() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("taur", ParamSpec::new(200.0, 1e-9, f64::INFINITY, "ms"));
        parameters.insert("cainf", ParamSpec::nonnegative(1e-4, "mM"));
        parameters.insert("depth", ParamSpec::new(0.1, 1e-9, f64::INFINITY, "µm"));
        let mut ions = BTreeMap::new();
        ions.insert(
            "ca",
            IonDep {
                read_concentration: true,
                write_int_concentration: true,
                expected_valence: Some(2),
                ..IonDep::default()
            },
        );
        Self {
            info: MechanismInfo {
                name: "cad",
                kind: MechanismKind::Density,
                parameters,
                state: vec![],
                ions,
                linear: false,
                post_events: false,
            },
            id: 0,
            layout: MechanismLayout::default(),
            taur: Vec::new(),
            cainf: Vec::new(),
            depth: Vec::new(),
        }
    }
}

impl Default for IonDecay {
    fn default() -> Self {
        Self::new()
    }
}

impl Mechanism for IonDecay {
    fn info(&self) -> &MechanismInfo {
        &self.info
    }

    fn mechanism_id(&self) -> u32 {
        self.id
    }

    fn instantiate(&mut self, id: u32, layout: MechanismLayout) -> Result<(), MechanismError> {
        self.id = id;
        let width = layout.cv.len();
        ion_column(&layout, &self.info, "ca")?;
        self.taur = crate::param_column(&self.info.parameters["taur"], width);
        self.cainf = crate::param_column(&self.info.parameters["cainf"], width);
        self.depth = crate::param_column(&self.info.parameters["depth"], width);
        self.layout = layout;
        Ok(())
    }

    fn set_parameter(&mut self, name: &str, values: &[f64]) -> Result<(), MechanismError> {
        check_column(&self.info, name, values, self.width())?;
        match name {
            "taur" => self.taur.copy_from_slice(values),
            "cainf" => self.cainf.copy_from_slice(values),
            "depth" => self.depth.copy_from_slice(values),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut MechCtx) {}

    fn update_current(&mut self, _ctx: &mut MechCtx) {}

    fn update_state(&mut self, _ctx: &mut MechCtx) {}

    fn update_ions(&mut self, ctx: &mut MechCtx) {
        let index = &self.layout.ion_index["ca"];
        let Some(ca) = ctx.ions.get_mut("ca") else {
            return;
        };
        let z = f64::from(ca.charge);
        for (i, &cv) in self.layout.cv.iter().enumerate() {
            let cv = cv as usize;
            let dt = ctx.dt_cv[cv];
            if dt <= 0.0 {
                continue;
            }
            let j = index[i] as usize;
            // Influx through a shell of `depth` µm: A/m² → mM/ms.
            let flux = -ca.ix[j] * 1e3 / (z * FARADAY * self.depth[i]);
            let decay = (self.cainf[i] - ca.xi[j]) / self.taur[i];
            ca.xi[j] += dt * (flux + decay);
        }
    }

    fn state_values(&self, _var: &str) -> Option<&[f64]> {
        None
    }

    fn width(&self) -> usize {
        self.layout.cv.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_fixture<'a>(
        voltage: &'a [f64],
        current: &'a mut [f64],
        conductivity: &'a mut [f64],
        temperature: &'a [f64],
        dt: &'a [f64],
    ) -> MechCtx<'a> {
        MechCtx {
            voltage,
            current_density: current,
            conductivity,
            temperature,
            dt_cv: dt,
            ions: BTreeMap::new(),
        }
    }

    #[test]
    fn pas_is_ohmic() {
        let mut pas = Pas::new();
        pas.instantiate(
            0,
            MechanismLayout {
                cv: vec![0],
                peer_cv: vec![],
                weight: vec![1.0],
                multiplicity: vec![],
                ion_index: BTreeMap::new(),
            },
        )
        .unwrap();
        pas.set_parameter("g", &[0.001]).unwrap();
        pas.set_parameter("e", &[-65.0]).unwrap();

        let voltage = [-55.0];
        let temperature = [279.45];
        let dt = [0.025];
        let mut current = [0.0];
        let mut conductivity = [0.0];
        let mut ctx = ctx_fixture(&voltage, &mut current, &mut conductivity, &temperature, &dt);
        pas.update_current(&mut ctx);
        // 10·0.001 S/cm² · 10 mV = 0.1 A/m².
        assert!((current[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn expsyn_decays_between_events() {
        let mut syn = ExpSyn::new();
        syn.instantiate(
            3,
            MechanismLayout {
                cv: vec![0],
                peer_cv: vec![],
                weight: vec![1.0],
                multiplicity: vec![],
                ion_index: BTreeMap::new(),
            },
        )
        .unwrap();
        syn.set_parameter("tau", &[2.0]).unwrap();

        syn.deliver_events(&[Deliverable {
            mech_id: 3,
            index: 0,
            weight: 0.5,
        }]);
        assert_eq!(syn.state_values("g").unwrap()[0], 0.5);

        let voltage = [-65.0];
        let temperature = [279.45];
        let dt = [2.0];
        let mut current = [0.0];
        let mut conductivity = [0.0];
        let mut ctx = ctx_fixture(&voltage, &mut current, &mut conductivity, &temperature, &dt);
        syn.update_state(&mut ctx);
        let g = syn.state_values("g").unwrap()[0];
        assert!((g - 0.5 * (-1.0f64).exp()).abs() < 1e-12);

        // Events for other mechanisms are ignored.
        syn.deliver_events(&[Deliverable {
            mech_id: 7,
            index: 0,
            weight: 1.0,
        }]);
        assert_eq!(syn.state_values("g").unwrap()[0], g);
    }

    #[test]
    fn hh_gates_start_at_steady_state() {
        let rates = hh_rates(-65.0, 279.45);
        assert!(rates.m_inf > 0.0 && rates.m_inf < 0.1);
        assert!(rates.h_inf > 0.5);
        assert!(rates.n_inf > 0.2 && rates.n_inf < 0.5);
    }
}
