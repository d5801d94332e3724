//! Mechanism-data layout: translate painted density mechanisms, placed
//! synapses, gap junctions, stimuli and ion dependencies into per-CV
//! parameter arrays ready for instantiation.

use crate::discretization::CvDiscretization;
use crate::gapjunction::FvmGapJunction;
use crate::geometry::{append_divs, CvPrefer};
use crate::LayoutError;
use cable_cell::{CableCell, GlobalProperties, MechDesc};
use cable_mech::{Catalogue, MechanismError, MechanismInfo, MechanismKind};
use cable_morph::{pw_over_cable, Cable, McableMap};
use std::collections::{BTreeMap, BTreeSet};

/// Layout of one mechanism over a cell group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MechanismConfig {
    pub kind: Option<MechanismKind>,
    /// Sorted CV indices (global within the group) carrying an instance.
    pub cv: Vec<u32>,
    /// Coalesced instance counts per entry (point mechanisms only).
    pub multiplicity: Vec<u32>,
    /// Fraction of CV area covered (densities only).
    pub norm_area: Vec<f64>,
    /// Synapse target lids, expanded (point mechanisms only).
    pub target: Vec<u32>,
    /// Gap-junction peer CV per entry.
    pub peer_cv: Vec<u32>,
    /// Gap-junction connection weight per entry.
    pub local_weight: Vec<f64>,
    /// Parameter columns, ordered by parameter name.
    pub param_values: Vec<(String, Vec<f64>)>,
}

/// Per-ion CV support and initial/reset values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IonConfig {
    pub cv: Vec<u32>,
    pub init_iconc: Vec<f64>,
    pub init_econc: Vec<f64>,
    pub reset_iconc: Vec<f64>,
    pub reset_econc: Vec<f64>,
    pub init_revpot: Vec<f64>,
    pub iconc_written: bool,
    pub econc_written: bool,
    pub revpot_written: bool,
}

/// Stimulus table: envelopes are pre-scaled to A/m².
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StimulusConfig {
    pub cv: Vec<u32>,
    pub cv_unique: Vec<u32>,
    pub frequency: Vec<f64>,
    pub phase: Vec<f64>,
    pub envelope_time: Vec<Vec<f64>>,
    pub envelope_amplitude: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct MechanismData {
    pub mechanisms: BTreeMap<String, MechanismConfig>,
    pub ions: BTreeMap<String, IonConfig>,
    pub stimuli: StimulusConfig,
    pub n_target: u32,
    pub target_divs: Vec<u32>,
    pub post_events: bool,
}

// Sorted unique union of two sorted vectors.
fn unique_union(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut u = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        let next = if j >= b.len() || (i < a.len() && a[i] < b[j]) {
            let v = a[i];
            i += 1;
            v
        } else {
            let v = b[j];
            j += 1;
            if i < a.len() && a[i] == v {
                i += 1;
            }
            v
        };
        if u.last() != Some(&next) {
            u.push(next);
        }
    }
    u
}

fn kind_str(kind: MechanismKind) -> &'static str {
    match kind {
        MechanismKind::Density => "density",
        MechanismKind::Point => "point",
        MechanismKind::GapJunction => "gap_junction",
        MechanismKind::ReversalPotential => "reversal_potential",
    }
}

/// Verify mechanism ion usage and parameter values against the declaration.
fn verify_mechanism(
    gprop: &GlobalProperties,
    info: &MechanismInfo,
    desc: &MechDesc,
) -> Result<(), LayoutError> {
    for (pname, value) in &desc.values {
        let spec = info
            .param(pname)
            .ok_or_else(|| MechanismError::UnknownParameter {
                mech: desc.name.clone(),
                param: pname.clone(),
            })?;
        if !spec.valid(*value) {
            return Err(MechanismError::InvalidParameterValue {
                mech: desc.name.clone(),
                param: pname.clone(),
                value: *value,
                min: spec.min,
                max: spec.max,
            }
            .into());
        }
    }

    for (ion, dep) in &info.ions {
        let charge = gprop
            .ion_species
            .get(*ion)
            .copied()
            .ok_or_else(|| LayoutError::UnknownIon {
                mech: desc.name.clone(),
                ion: ion.to_string(),
            })?;
        if let Some(expected) = dep.expected_valence {
            if expected != charge {
                return Err(LayoutError::ValenceMismatch {
                    mech: desc.name.clone(),
                    ion: ion.to_string(),
                    expected,
                    got: charge,
                });
            }
        }
        if dep.write_reversal_potential
            && (dep.write_int_concentration || dep.write_ext_concentration)
        {
            return Err(LayoutError::RevpotAndConcentration {
                mech: desc.name.clone(),
                ion: ion.to_string(),
            });
        }
    }
    Ok(())
}

struct IonUsage {
    support: BTreeMap<String, Vec<u32>>,
    write_xi: BTreeSet<String>,
    write_xo: BTreeSet<String>,
    init_iconc_mask: BTreeMap<String, McableMap<f64>>,
    init_econc_mask: BTreeMap<String, McableMap<f64>>,
}

impl IonUsage {
    fn new() -> Self {
        Self {
            support: BTreeMap::new(),
            write_xi: BTreeSet::new(),
            write_xo: BTreeSet::new(),
            init_iconc_mask: BTreeMap::new(),
            init_econc_mask: BTreeMap::new(),
        }
    }

    fn add_support(&mut self, info: &MechanismInfo, cvs: &[u32]) {
        for ion in info.ions.keys() {
            let entry = self.support.entry(ion.to_string()).or_default();
            *entry = unique_union(entry, cvs);
        }
    }
}

/// Build the mechanism data of one cell. CV indices in the result are
/// absolute (group) indices; only synapse target numbering is cell-local
/// until `append` shifts it.
pub fn build_mechanism_data(
    gprop: &GlobalProperties,
    catalogue: &Catalogue,
    cell: &CableCell,
    gj_conns: &[FvmGapJunction],
    d: &CvDiscretization,
    cell_idx: usize,
) -> Result<MechanismData, LayoutError> {
    let asg = cell.assignments();
    let embedding = cell.embedding();
    let mut data = MechanismData::default();
    let mut usage = IonUsage::new();

    // Density mechanisms: area-weighted parameter averages per CV.
    for (name, entries) in &asg.density {
        let info = catalogue.info(name)?;
        if info.kind != MechanismKind::Density {
            return Err(LayoutError::WrongMechanismKind {
                mech: name.clone(),
                expected: "density",
                got: kind_str(info.kind),
            });
        }

        let param_names: Vec<&'static str> = info.parameters.keys().copied().collect();
        let param_dflt: Vec<f64> = param_names
            .iter()
            .map(|p| info.parameters[p].default)
            .collect();
        let n_param = param_names.len();

        for (_, desc) in entries {
            verify_mechanism(gprop, info, desc)?;
        }

        let mut config = MechanismConfig {
            kind: Some(MechanismKind::Density),
            ..Default::default()
        };
        for p in &param_names {
            config.param_values.push((p.to_string(), Vec::new()));
        }

        let mut param_on_cv = vec![0.0; n_param];
        for cv in d.geometry.cell_cvs(cell_idx) {
            let mut area = 0.0;
            param_on_cv.iter_mut().for_each(|x| *x = 0.0);

            for cable in d.geometry.cables(cv) {
                for (painted, desc) in entries {
                    if painted.branch != cable.branch {
                        continue;
                    }
                    let lo = painted.prox_pos.max(cable.prox_pos);
                    let hi = painted.dist_pos.min(cable.dist_pos);
                    if hi <= lo {
                        continue;
                    }
                    let area_on_cable = embedding.integrate_area(Cable::new(cable.branch, lo, hi));
                    if area_on_cable == 0.0 {
                        continue;
                    }
                    area += area_on_cable;
                    for (k, p) in param_names.iter().enumerate() {
                        let value = desc.values.get(*p).copied().unwrap_or(param_dflt[k]);
                        param_on_cv[k] += area_on_cable * value;
                    }
                }
            }

            if area > 0.0 {
                config.cv.push(cv as u32);
                config.norm_area.push(area / d.cv_area[cv]);
                for (k, acc) in param_on_cv.iter().enumerate() {
                    config.param_values[k].1.push(acc / area);
                }
            }
        }

        for (ion, dep) in &info.ions {
            if dep.write_int_concentration {
                usage.write_xi.insert(ion.to_string());
                let mask = usage.init_iconc_mask.entry(ion.to_string()).or_default();
                for (painted, _) in entries {
                    if !mask.insert(*painted, 0.0) {
                        return Err(LayoutError::OverlappingIonWriter {
                            mech: name.clone(),
                            ion: ion.to_string(),
                        });
                    }
                }
            }
            if dep.write_ext_concentration {
                usage.write_xo.insert(ion.to_string());
                let mask = usage.init_econc_mask.entry(ion.to_string()).or_default();
                for (painted, _) in entries {
                    if !mask.insert(*painted, 0.0) {
                        return Err(LayoutError::OverlappingIonWriter {
                            mech: name.clone(),
                            ion: ion.to_string(),
                        });
                    }
                }
            }
        }

        usage.add_support(info, &config.cv);
        if !config.cv.is_empty() {
            data.mechanisms.insert(name.clone(), config);
        }
    }

    // Synapses: stable order by (cv, parameter set, target); adjacent equal
    // (cv, parameters) tuples coalesce when the mechanism is linear.
    for (name, placements) in &asg.synapses {
        let info = catalogue.info(name)?;
        if info.kind != MechanismKind::Point {
            return Err(LayoutError::WrongMechanismKind {
                mech: name.clone(),
                expected: "point",
                got: kind_str(info.kind),
            });
        }
        data.post_events |= info.post_events;

        let param_names: Vec<&'static str> = info.parameters.keys().copied().collect();
        let n_param = param_names.len();

        struct SynapseInstance {
            cv: u32,
            params: Vec<f64>,
            target: u32,
        }

        let mut instances = Vec::with_capacity(placements.len());
        for placed in placements {
            verify_mechanism(gprop, info, &placed.item)?;
            let params: Vec<f64> = param_names
                .iter()
                .map(|p| {
                    placed
                        .item
                        .values
                        .get(*p)
                        .copied()
                        .unwrap_or(info.parameters[p].default)
                })
                .collect();
            instances.push(SynapseInstance {
                cv: d
                    .geometry
                    .location_cv(cell_idx, placed.loc, CvPrefer::Nonempty),
                params,
                target: placed.lid,
            });
        }

        instances.sort_by(|a, b| {
            (a.cv, &a.params, a.target)
                .partial_cmp(&(b.cv, &b.params, b.target))
                .unwrap()
        });

        let coalesce = info.linear && gprop.coalesce_synapses;

        let mut config = MechanismConfig {
            kind: Some(MechanismKind::Point),
            ..Default::default()
        };
        for p in &param_names {
            config.param_values.push((p.to_string(), Vec::new()));
        }

        for inst in &instances {
            let merged = coalesce
                && config
                    .cv
                    .last()
                    .map(|&cv| {
                        cv == inst.cv
                            && (0..n_param)
                                .all(|k| config.param_values[k].1.last() == Some(&inst.params[k]))
                    })
                    .unwrap_or(false);
            if merged {
                *config.multiplicity.last_mut().unwrap() += 1;
            } else {
                config.cv.push(inst.cv);
                if coalesce {
                    config.multiplicity.push(1);
                }
                for k in 0..n_param {
                    config.param_values[k].1.push(inst.params[k]);
                }
            }
            config.target.push(inst.target);
        }

        usage.add_support(info, &config.cv);
        for (ion, dep) in &info.ions {
            if dep.write_int_concentration {
                usage.write_xi.insert(ion.to_string());
            }
            if dep.write_ext_concentration {
                usage.write_xo.insert(ion.to_string());
            }
        }

        data.n_target += config.target.len() as u32;
        if !config.cv.is_empty() {
            data.mechanisms.insert(name.clone(), config);
        }
    }

    // Gap junctions: one mechanism column per resolved connection, matched
    // to the placed junction on the connection's local lid.
    let mut lid_junction: BTreeMap<u32, (String, Vec<f64>)> = BTreeMap::new();
    let mut junction_configs: BTreeMap<String, MechanismConfig> = BTreeMap::new();
    for (name, placements) in &asg.junctions {
        let info = catalogue.info(name)?;
        if info.kind != MechanismKind::GapJunction {
            return Err(LayoutError::WrongMechanismKind {
                mech: name.clone(),
                expected: "gap_junction",
                got: kind_str(info.kind),
            });
        }

        let param_names: Vec<&'static str> = info.parameters.keys().copied().collect();
        let mut config = MechanismConfig {
            kind: Some(MechanismKind::GapJunction),
            ..Default::default()
        };
        for p in &param_names {
            config.param_values.push((p.to_string(), Vec::new()));
        }

        for placed in placements {
            verify_mechanism(gprop, info, &placed.item)?;
            let values: Vec<f64> = param_names
                .iter()
                .map(|p| {
                    placed
                        .item
                        .values
                        .get(*p)
                        .copied()
                        .unwrap_or(info.parameters[p].default)
                })
                .collect();
            lid_junction.insert(placed.lid, (name.clone(), values));
        }

        for (ion, dep) in &info.ions {
            if dep.write_int_concentration {
                usage.write_xi.insert(ion.to_string());
            }
            if dep.write_ext_concentration {
                usage.write_xo.insert(ion.to_string());
            }
        }

        junction_configs.insert(name.clone(), config);
    }

    for conn in gj_conns {
        let (name, values) =
            lid_junction
                .get(&conn.local_lid)
                .ok_or(LayoutError::BadGapJunction {
                    gid: u32::MAX,
                    lid: conn.local_lid,
                })?;
        let config = junction_configs
            .get_mut(name)
            .expect("junction config exists for placed mechanism");
        config.cv.push(conn.local_cv);
        config.peer_cv.push(conn.peer_cv);
        config.local_weight.push(conn.weight);
        for (k, v) in values.iter().enumerate() {
            config.param_values[k].1.push(*v);
        }
    }

    for (name, config) in junction_configs {
        if !config.cv.is_empty() {
            data.mechanisms.insert(name, config);
        }
    }

    // Stimuli, ordered by CV; envelopes pre-scaled from nA to A/m².
    if !asg.stimuli.is_empty() {
        let mut order: Vec<usize> = (0..asg.stimuli.len()).collect();
        let stim_cv: Vec<u32> = asg
            .stimuli
            .iter()
            .map(|p| d.geometry.location_cv(cell_idx, p.loc, CvPrefer::Nonempty))
            .collect();
        order.sort_by_key(|&i| stim_cv[i]);

        let mut config = StimulusConfig::default();
        for i in order {
            let stim = &asg.stimuli[i].item;
            let cv = stim_cv[i];
            let cv_area_scale = 1000.0 / d.cv_area[cv as usize];

            config.cv.push(cv);
            config.frequency.push(stim.frequency);
            config.phase.push(stim.phase);
            config
                .envelope_time
                .push(stim.envelope.iter().map(|&(t, _)| t).collect());
            config
                .envelope_amplitude
                .push(stim.envelope.iter().map(|&(_, a)| a * cv_area_scale).collect());
        }
        config.cv_unique = config.cv.clone();
        config.cv_unique.dedup();
        data.stimuli = config;
    }

    // Ions: CV support union over using mechanisms; reset values are always
    // the painted/default concentrations, init values are zeroed inside
    // regions claimed by a writing mechanism.
    for (ion, cvs) in &usage.support {
        let mut config = IonConfig {
            cv: cvs.clone(),
            ..Default::default()
        };
        let n_cv = config.cv.len();
        config.init_iconc = vec![0.0; n_cv];
        config.init_econc = vec![0.0; n_cv];
        config.reset_iconc = vec![0.0; n_cv];
        config.reset_econc = vec![0.0; n_cv];
        config.init_revpot = vec![0.0; n_cv];

        let global_ion = gprop
            .default_parameters
            .ion_data
            .get(ion)
            .copied()
            .unwrap_or_default();
        let cell_ion = cell.defaults().ion_data.get(ion).copied().unwrap_or_default();

        let dflt_iconc = cell_ion
            .init_int_concentration
            .or(global_ion.init_int_concentration)
            .ok_or(LayoutError::IncompleteGlobalProperties("ion_data"))?;
        let dflt_econc = cell_ion
            .init_ext_concentration
            .or(global_ion.init_ext_concentration)
            .ok_or(LayoutError::IncompleteGlobalProperties("ion_data"))?;
        let dflt_revpot = cell_ion
            .init_reversal_potential
            .or(global_ion.init_reversal_potential)
            .ok_or(LayoutError::IncompleteGlobalProperties("ion_data"))?;

        let empty = McableMap::new();
        let iconc_map = asg.ion_init_iconc.get(ion).unwrap_or(&empty);
        let econc_map = asg.ion_init_econc.get(ion).unwrap_or(&empty);
        let revpot_map = asg.ion_init_revpot.get(ion).unwrap_or(&empty);
        let iconc_mask = usage.init_iconc_mask.get(ion);
        let econc_mask = usage.init_econc_mask.get(ion);

        for (i, &cv) in config.cv.iter().enumerate() {
            let cv = cv as usize;
            if d.cv_area[cv] == 0.0 {
                continue;
            }
            for &cable in d.geometry.cables(cv) {
                let iconc = pw_over_cable(iconc_map, cable, dflt_iconc, |v| *v);
                let econc = pw_over_cable(econc_map, cable, dflt_econc, |v| *v);
                let revpot = pw_over_cable(revpot_map, cable, dflt_revpot, |v| *v);

                config.reset_iconc[i] += embedding.integrate_area_pw(cable.branch, &iconc);
                config.reset_econc[i] += embedding.integrate_area_pw(cable.branch, &econc);
                config.init_revpot[i] += embedding.integrate_area_pw(cable.branch, &revpot);

                let masked = |mask: Option<&McableMap<f64>>, values: &[cable_morph::PwElement<f64>]| {
                    // Multiply the concentration by the write mask (0 inside
                    // written regions, 1 outside).
                    let mask_pw = match mask {
                        Some(m) => pw_over_cable(m, cable, 1.0, |v| *v),
                        None => pw_over_cable(&empty, cable, 1.0, |v| *v),
                    };
                    let mut out = Vec::new();
                    for piece in values {
                        for mp in &mask_pw {
                            let lo = piece.lo.max(mp.lo);
                            let hi = piece.hi.min(mp.hi);
                            if hi > lo {
                                out.push(cable_morph::PwElement {
                                    lo,
                                    hi,
                                    value: piece.value * mp.value,
                                });
                            }
                        }
                    }
                    out
                };

                config.init_iconc[i] +=
                    embedding.integrate_area_pw(cable.branch, &masked(iconc_mask, &iconc));
                config.init_econc[i] +=
                    embedding.integrate_area_pw(cable.branch, &masked(econc_mask, &econc));
            }

            let oo_area = 1.0 / d.cv_area[cv];
            config.reset_iconc[i] *= oo_area;
            config.reset_econc[i] *= oo_area;
            config.init_revpot[i] *= oo_area;
            config.init_iconc[i] *= oo_area;
            config.init_econc[i] *= oo_area;
        }

        config.iconc_written = usage.write_xi.contains(ion);
        config.econc_written = usage.write_xo.contains(ion);
        if !config.cv.is_empty() {
            data.ions.insert(ion.clone(), config);
        }
    }

    // Reversal potential methods, instantiated on the union of the CVs of
    // all mechanisms reading the ion.
    let mut revpot_tbl: BTreeMap<String, MechDesc> = BTreeMap::new();
    let mut revpot_specified: BTreeSet<String> = BTreeSet::new();

    for ion in gprop.ion_species.keys() {
        let method = cell
            .defaults()
            .reversal_potential_method
            .get(ion)
            .or_else(|| gprop.default_parameters.reversal_potential_method.get(ion));
        let Some(revpot) = method else {
            continue;
        };
        let info = catalogue.info(&revpot.name)?;
        if info.kind != MechanismKind::ReversalPotential {
            return Err(LayoutError::WrongMechanismKind {
                mech: revpot.name.clone(),
                expected: "reversal_potential",
                got: kind_str(info.kind),
            });
        }
        verify_mechanism(gprop, info, revpot)?;
        revpot_specified.insert(ion.clone());

        let mut writes_this_revpot = false;
        for (dep_ion, dep) in &info.ions {
            if dep.write_reversal_potential {
                match revpot_tbl.get(*dep_ion) {
                    Some(existing)
                        if existing.name != revpot.name || existing.values != revpot.values =>
                    {
                        return Err(LayoutError::RevpotInconsistent(revpot.name.clone()));
                    }
                    Some(_) => {}
                    None => {
                        revpot_tbl.insert(dep_ion.to_string(), revpot.clone());
                    }
                }
                writes_this_revpot |= *dep_ion == ion.as_str();
            }
        }
        if !writes_this_revpot {
            return Err(LayoutError::RevpotDoesNotWrite {
                mech: revpot.name.clone(),
                ion: ion.clone(),
            });
        }

        // Instantiate only where the ion is in use.
        let Some(ion_config) = data.ions.get_mut(ion) else {
            continue;
        };
        ion_config.revpot_written = true;
        let ion_cvs = ion_config.cv.clone();

        if let Some(config) = data.mechanisms.get_mut(&revpot.name) {
            config.cv = unique_union(&config.cv, &ion_cvs);
            config.norm_area = vec![1.0; config.cv.len()];
            for pv in &mut config.param_values {
                let value = pv.1.first().copied().unwrap_or_default();
                pv.1 = vec![value; config.cv.len()];
            }
        } else {
            let mut config = MechanismConfig {
                kind: Some(MechanismKind::ReversalPotential),
                cv: ion_cvs,
                ..Default::default()
            };
            config.norm_area = vec![1.0; config.cv.len()];
            for (p, spec) in &info.parameters {
                let value = revpot.values.get(*p).copied().unwrap_or(spec.default);
                config
                    .param_values
                    .push((p.to_string(), vec![value; config.cv.len()]));
            }
            data.mechanisms.insert(revpot.name.clone(), config);
        }
    }

    // Every ion written by some revpot mechanism must carry its own method.
    for (ion, desc) in &revpot_tbl {
        if !revpot_specified.contains(ion) {
            return Err(LayoutError::RevpotUnspecifiedWrite {
                mech: desc.name.clone(),
                ion: ion.clone(),
            });
        }
    }

    data.target_divs = vec![0, data.n_target];
    Ok(data)
}

impl MechanismData {
    /// Concatenate another cell's mechanism data. CV indices are already
    /// absolute; target numbering is shifted by the running target count.
    pub fn append(&mut self, right: &MechanismData) {
        let target_offset = self.n_target;

        for (ion, r) in &right.ions {
            let l = self.ions.entry(ion.clone()).or_default();
            l.cv.extend_from_slice(&r.cv);
            l.init_iconc.extend_from_slice(&r.init_iconc);
            l.init_econc.extend_from_slice(&r.init_econc);
            l.reset_iconc.extend_from_slice(&r.reset_iconc);
            l.reset_econc.extend_from_slice(&r.reset_econc);
            l.init_revpot.extend_from_slice(&r.init_revpot);
            l.iconc_written |= r.iconc_written;
            l.econc_written |= r.econc_written;
            l.revpot_written |= r.revpot_written;
        }

        for (name, r) in &right.mechanisms {
            match self.mechanisms.get_mut(name) {
                None => {
                    let mut config = r.clone();
                    for t in &mut config.target {
                        *t += target_offset;
                    }
                    self.mechanisms.insert(name.clone(), config);
                }
                Some(l) => {
                    debug_assert_eq!(l.kind, r.kind);
                    debug_assert_eq!(l.param_values.len(), r.param_values.len());
                    l.cv.extend_from_slice(&r.cv);
                    l.peer_cv.extend_from_slice(&r.peer_cv);
                    l.multiplicity.extend_from_slice(&r.multiplicity);
                    l.norm_area.extend_from_slice(&r.norm_area);
                    l.local_weight.extend_from_slice(&r.local_weight);
                    l.target.extend(r.target.iter().map(|&t| t + target_offset));
                    for (lp, rp) in l.param_values.iter_mut().zip(&r.param_values) {
                        debug_assert_eq!(lp.0, rp.0);
                        lp.1.extend_from_slice(&rp.1);
                    }
                }
            }
        }

        self.stimuli.cv.extend_from_slice(&right.stimuli.cv);
        self.stimuli
            .cv_unique
            .extend_from_slice(&right.stimuli.cv_unique);
        self.stimuli
            .frequency
            .extend_from_slice(&right.stimuli.frequency);
        self.stimuli.phase.extend_from_slice(&right.stimuli.phase);
        self.stimuli
            .envelope_time
            .extend(right.stimuli.envelope_time.iter().cloned());
        self.stimuli
            .envelope_amplitude
            .extend(right.stimuli.envelope_amplitude.iter().cloned());

        self.n_target += right.n_target;
        self.post_events |= right.post_events;
        append_divs(&mut self.target_divs, &right.target_divs);
    }
}

/// Build and concatenate mechanism data for every cell of a group.
pub fn build_mechanism_data_all(
    gprop: &GlobalProperties,
    catalogue: &Catalogue,
    cells: &[CableCell],
    gj_conns: &[Vec<FvmGapJunction>],
    d: &CvDiscretization,
) -> Result<MechanismData, LayoutError> {
    let mut combined = MechanismData {
        target_divs: vec![0],
        ..Default::default()
    };
    static NO_CONNS: Vec<FvmGapJunction> = Vec::new();
    for (cell_idx, cell) in cells.iter().enumerate() {
        let conns = gj_conns.get(cell_idx).unwrap_or(&NO_CONNS);
        let cell_data = build_mechanism_data(gprop, catalogue, cell, conns, d, cell_idx)?;
        combined.append(&cell_data);
    }
    Ok(combined)
}
