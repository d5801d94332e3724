//! Probe addresses and their resolution against the discretized state.
//!
//! Every address variant resolves to a list of scalar outputs, each a
//! weighted sum over raw state sources, plus variant-specific metadata.

use cable_cell::CableCell;
use cable_fvm::{
    axial_current, interpolate_voltage, CvDiscretization, CvPrefer, MechanismData,
};
use cable_morph::{Cable, Location, Locset};

/// Sampling policy of a sampler association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePolicy {
    /// Constrain integration step boundaries to the sample times.
    Exact,
    /// Record at the step boundary nearest, and not later than, the
    /// requested time.
    Lax,
}

/// Cable-cell probe address variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeAddress {
    MembraneVoltage(Locset),
    MembraneVoltageCell,
    AxialCurrent(Locset),
    TotalIonCurrentDensity(Locset),
    TotalIonCurrentCell,
    StimulusCurrentCell,
    DensityState {
        mech: String,
        state: String,
        locset: Locset,
    },
    DensityStateCell {
        mech: String,
        state: String,
    },
    PointState {
        target: u32,
        mech: String,
        state: String,
    },
    PointStateCell {
        mech: String,
        state: String,
    },
    IonCurrentDensity {
        ion: String,
        locset: Locset,
    },
    IonCurrentCell {
        ion: String,
    },
    IonIntConcentration {
        ion: String,
        locset: Locset,
    },
    IonIntConcentrationCell {
        ion: String,
    },
    IonExtConcentration {
        ion: String,
        locset: Locset,
    },
    IonExtConcentrationCell {
        ion: String,
    },
}

/// Metadata delivered alongside sampled values, tagged per variant family.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeMetadata {
    Locations(Vec<Location>),
    Cables(Vec<Cable>),
    PointInfo(Vec<PointInfo>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointInfo {
    pub target: u32,
    pub multiplicity: u32,
    pub loc: Location,
}

/// A raw scalar source in the shared or mechanism state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ProbeSource {
    Voltage(u32),
    CurrentDensity(u32),
    StimAccu(u32),
    IonCurrent { ion: String, index: u32 },
    IonInt { ion: String, index: u32 },
    IonExt { ion: String, index: u32 },
    MechState { mech: usize, var: String, col: u32 },
}

/// A resolved probe: each output scalar is `Σ coef·source`.
#[derive(Debug, Clone)]
pub(crate) struct ProbeData {
    pub terms: Vec<Vec<(ProbeSource, f64)>>,
    pub metadata: ProbeMetadata,
}

pub(crate) struct ProbeResolution<'a> {
    pub cell: &'a CableCell,
    pub cell_idx: usize,
    pub d: &'a CvDiscretization,
    pub m: &'a MechanismData,
    /// Mechanism name → (index into the group's mechanism list, multiplicity
    /// table reference).
    pub mech_index: &'a dyn Fn(&str) -> Option<usize>,
    /// Group-wide target handle lookup: target index → (mech list index,
    /// column).
    pub target_handle: &'a dyn Fn(u32) -> Option<(usize, u32)>,
}

impl ProbeResolution<'_> {
    pub fn resolve(&self, addr: &ProbeAddress) -> Option<ProbeData> {
        match addr {
            ProbeAddress::MembraneVoltage(locset) => {
                let locs = locset.resolve(self.cell.morphology()).ok()?;
                let mut terms = Vec::new();
                for &loc in &locs {
                    let vi = interpolate_voltage(self.cell, self.d, self.cell_idx, loc);
                    terms.push(vec![
                        (ProbeSource::Voltage(vi.proximal_cv), vi.proximal_coef),
                        (ProbeSource::Voltage(vi.distal_cv), vi.distal_coef),
                    ]);
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Locations(locs),
                })
            }
            ProbeAddress::MembraneVoltageCell => {
                let mut terms = Vec::new();
                let mut cables = Vec::new();
                for cv in self.d.geometry.cell_cvs(self.cell_idx) {
                    for &cable in self.d.geometry.cables(cv) {
                        terms.push(vec![(ProbeSource::Voltage(cv as u32), 1.0)]);
                        cables.push(cable);
                    }
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Cables(cables),
                })
            }
            ProbeAddress::AxialCurrent(locset) => {
                let locs = locset.resolve(self.cell.morphology()).ok()?;
                let mut terms = Vec::new();
                for &loc in &locs {
                    let vi = axial_current(self.cell, self.d, self.cell_idx, loc);
                    terms.push(vec![
                        (ProbeSource::Voltage(vi.proximal_cv), vi.proximal_coef),
                        (ProbeSource::Voltage(vi.distal_cv), vi.distal_coef),
                    ]);
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Locations(locs),
                })
            }
            ProbeAddress::TotalIonCurrentDensity(locset) => {
                let locs = locset.resolve(self.cell.morphology()).ok()?;
                let mut terms = Vec::new();
                for &loc in &locs {
                    let cv = self
                        .d
                        .geometry
                        .location_cv(self.cell_idx, loc, CvPrefer::Nonempty);
                    // Membrane current excludes the stimulus contribution.
                    let mut sum = vec![(ProbeSource::CurrentDensity(cv), 1.0)];
                    if let Some(j) = binary_search(&self.m.stimuli.cv_unique, cv) {
                        sum.push((ProbeSource::StimAccu(j), 1.0));
                    }
                    terms.push(sum);
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Locations(locs),
                })
            }
            ProbeAddress::TotalIonCurrentCell => {
                let mut terms = Vec::new();
                let mut cables = Vec::new();
                for cv in self.d.geometry.cell_cvs(self.cell_idx) {
                    let stim = binary_search(&self.m.stimuli.cv_unique, cv as u32);
                    for &cable in self.d.geometry.cables(cv) {
                        let area = self.cell.embedding().integrate_area(cable);
                        if area > 0.0 {
                            // Scale from µm²·A/m² to nA.
                            let coef = 0.001 * area;
                            let mut sum =
                                vec![(ProbeSource::CurrentDensity(cv as u32), coef)];
                            if let Some(j) = stim {
                                sum.push((ProbeSource::StimAccu(j), coef));
                            }
                            terms.push(sum);
                            cables.push(cable);
                        }
                    }
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Cables(cables),
                })
            }
            ProbeAddress::StimulusCurrentCell => {
                let mut terms = Vec::new();
                let mut cables = Vec::new();
                for cv in self.d.geometry.cell_cvs(self.cell_idx) {
                    let stim = binary_search(&self.m.stimuli.cv_unique, cv as u32);
                    for &cable in self.d.geometry.cables(cv) {
                        let area = self.cell.embedding().integrate_area(cable);
                        if area > 0.0 {
                            let sum = match stim {
                                Some(j) => vec![(ProbeSource::StimAccu(j), 0.001 * area)],
                                None => Vec::new(),
                            };
                            terms.push(sum);
                            cables.push(cable);
                        }
                    }
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Cables(cables),
                })
            }
            ProbeAddress::DensityState {
                mech,
                state,
                locset,
            } => {
                let mech_idx = (self.mech_index)(mech)?;
                let config = self.m.mechanisms.get(mech)?;
                let support = self.cell.density_support(mech);
                let locs = locset.resolve(self.cell.morphology()).ok()?;
                let mut terms = Vec::new();
                let mut kept = Vec::new();
                for &loc in &locs {
                    if !support.intersects(loc) {
                        continue;
                    }
                    let cv = self
                        .d
                        .geometry
                        .location_cv(self.cell_idx, loc, CvPrefer::Nonempty);
                    let Some(col) = binary_search(&config.cv, cv) else {
                        continue;
                    };
                    terms.push(vec![(
                        ProbeSource::MechState {
                            mech: mech_idx,
                            var: state.clone(),
                            col,
                        },
                        1.0,
                    )]);
                    kept.push(loc);
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Locations(kept),
                })
            }
            ProbeAddress::DensityStateCell { mech, state } => {
                let mech_idx = (self.mech_index)(mech)?;
                let config = self.m.mechanisms.get(mech)?;
                let support = self.cell.density_support(mech);
                let mut terms = Vec::new();
                let mut cables = Vec::new();
                for (col, &cv) in config.cv.iter().enumerate() {
                    if !self.d.geometry.cell_cvs(self.cell_idx).contains(&(cv as usize)) {
                        continue;
                    }
                    for &cable in self.d.geometry.cables(cv as usize) {
                        let cv_extent = cable_morph::Mextent::from_cables(vec![cable]);
                        let covered = cv_extent.intersect(&support);
                        for &piece in covered.cables() {
                            if piece.is_trivial() {
                                continue;
                            }
                            terms.push(vec![(
                                ProbeSource::MechState {
                                    mech: mech_idx,
                                    var: state.clone(),
                                    col: col as u32,
                                },
                                1.0,
                            )]);
                            cables.push(piece);
                        }
                    }
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Cables(cables),
                })
            }
            ProbeAddress::PointState {
                target,
                mech,
                state,
            } => {
                let mech_idx = (self.mech_index)(mech)?;
                let config = self.m.mechanisms.get(mech)?;
                // Convert the cell-local target to the group target index.
                let base = self.m.target_divs[self.cell_idx];
                let end = self.m.target_divs[self.cell_idx + 1];
                let cg_target = target + base;
                if cg_target >= end {
                    return None;
                }
                let (handle_mech, col) = (self.target_handle)(cg_target)?;
                if handle_mech != mech_idx {
                    return None;
                }
                let placed = self.cell.assignments().synapses.get(mech)?;
                let loc = placed.iter().find(|p| p.lid == *target)?.loc;
                let multiplicity = config
                    .multiplicity
                    .get(col as usize)
                    .copied()
                    .unwrap_or(1);
                Some(ProbeData {
                    terms: vec![vec![(
                        ProbeSource::MechState {
                            mech: mech_idx,
                            var: state.clone(),
                            col,
                        },
                        1.0,
                    )]],
                    metadata: ProbeMetadata::PointInfo(vec![PointInfo {
                        target: *target,
                        multiplicity,
                        loc,
                    }]),
                })
            }
            ProbeAddress::PointStateCell { mech, state } => {
                let mech_idx = (self.mech_index)(mech)?;
                let config = self.m.mechanisms.get(mech)?;
                let placed = self.cell.assignments().synapses.get(mech)?;
                let base = self.m.target_divs[self.cell_idx];
                let end = self.m.target_divs[self.cell_idx + 1];
                let mut terms = Vec::new();
                let mut info = Vec::new();
                for cg_target in base..end {
                    let Some((handle_mech, col)) = (self.target_handle)(cg_target) else {
                        continue;
                    };
                    if handle_mech != mech_idx {
                        continue;
                    }
                    let cell_target = cg_target - base;
                    let Some(p) = placed.iter().find(|p| p.lid == cell_target) else {
                        continue;
                    };
                    terms.push(vec![(
                        ProbeSource::MechState {
                            mech: mech_idx,
                            var: state.clone(),
                            col,
                        },
                        1.0,
                    )]);
                    info.push(PointInfo {
                        target: cell_target,
                        multiplicity: config
                            .multiplicity
                            .get(col as usize)
                            .copied()
                            .unwrap_or(1),
                        loc: p.loc,
                    });
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::PointInfo(info),
                })
            }
            ProbeAddress::IonCurrentDensity { ion, locset } => {
                self.ion_scalar(ion, locset, |ion, index| ProbeSource::IonCurrent {
                    ion,
                    index,
                })
            }
            ProbeAddress::IonCurrentCell { ion } => {
                let config = self.m.ions.get(ion)?;
                let mut terms = Vec::new();
                let mut cables = Vec::new();
                for cv in self.d.geometry.cell_cvs(self.cell_idx) {
                    let Some(index) = binary_search(&config.cv, cv as u32) else {
                        continue;
                    };
                    for &cable in self.d.geometry.cables(cv) {
                        let area = self.cell.embedding().integrate_area(cable);
                        if area > 0.0 {
                            terms.push(vec![(
                                ProbeSource::IonCurrent {
                                    ion: ion.clone(),
                                    index,
                                },
                                0.001 * area,
                            )]);
                            cables.push(cable);
                        }
                    }
                }
                Some(ProbeData {
                    terms,
                    metadata: ProbeMetadata::Cables(cables),
                })
            }
            ProbeAddress::IonIntConcentration { ion, locset } => {
                self.ion_scalar(ion, locset, |ion, index| ProbeSource::IonInt { ion, index })
            }
            ProbeAddress::IonIntConcentrationCell { ion } => {
                self.ion_cell(ion, |ion, index| ProbeSource::IonInt { ion, index })
            }
            ProbeAddress::IonExtConcentration { ion, locset } => {
                self.ion_scalar(ion, locset, |ion, index| ProbeSource::IonExt { ion, index })
            }
            ProbeAddress::IonExtConcentrationCell { ion } => {
                self.ion_cell(ion, |ion, index| ProbeSource::IonExt { ion, index })
            }
        }
    }

    fn ion_scalar(
        &self,
        ion: &str,
        locset: &Locset,
        source: impl Fn(String, u32) -> ProbeSource,
    ) -> Option<ProbeData> {
        let config = self.m.ions.get(ion)?;
        let locs = locset.resolve(self.cell.morphology()).ok()?;
        let mut terms = Vec::new();
        let mut kept = Vec::new();
        for &loc in &locs {
            let cv = self
                .d
                .geometry
                .location_cv(self.cell_idx, loc, CvPrefer::Nonempty);
            let Some(index) = binary_search(&config.cv, cv) else {
                continue;
            };
            terms.push(vec![(source(ion.to_string(), index), 1.0)]);
            kept.push(loc);
        }
        Some(ProbeData {
            terms,
            metadata: ProbeMetadata::Locations(kept),
        })
    }

    fn ion_cell(
        &self,
        ion: &str,
        source: impl Fn(String, u32) -> ProbeSource,
    ) -> Option<ProbeData> {
        let config = self.m.ions.get(ion)?;
        let mut terms = Vec::new();
        let mut cables = Vec::new();
        for (index, &cv) in config.cv.iter().enumerate() {
            if !self.d.geometry.cell_cvs(self.cell_idx).contains(&(cv as usize)) {
                continue;
            }
            for &cable in self.d.geometry.cables(cv as usize) {
                if !cable.is_trivial() {
                    terms.push(vec![(source(ion.to_string(), index as u32), 1.0)]);
                    cables.push(cable);
                }
            }
        }
        Some(ProbeData {
            terms,
            metadata: ProbeMetadata::Cables(cables),
        })
    }
}

pub(crate) fn binary_search(sorted: &[u32], value: u32) -> Option<u32> {
    sorted.binary_search(&value).ok().map(|i| i as u32)
}
