#![forbid(unsafe_code)]

//! Cable cell descriptions: a morphology plus decorations (painted
//! parameters and density mechanisms, placed synapses, junctions, stimuli
//! and detectors), per-cell parameter defaults and the global property
//! bundle shared by all cable cells.

use std::collections::BTreeMap;

use cable_morph::{
    CvPolicy, Location, McableMap, Mextent, Morphology, MorphologyError, PwlinEmbedding, Region,
    Locset, Cable,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CableCellError {
    #[error(transparent)]
    Morphology(#[from] MorphologyError),
    #[error("incomplete global properties: {0} is unset")]
    IncompleteGlobalProperties(&'static str),
    #[error("incomplete global properties: ion {0} lacks default {1}")]
    IncompleteIonDefaults(String, &'static str),
}

/// Per-ion initial state defaults; any field may be overridden per cell or
/// painted per region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IonData {
    pub init_int_concentration: Option<f64>,
    pub init_ext_concentration: Option<f64>,
    pub init_reversal_potential: Option<f64>,
}

/// A mechanism by name with (non-global) parameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechDesc {
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl MechDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Cable-cell parameter set; used both as the per-cell default layer and as
/// the global default layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CableParams {
    pub init_membrane_potential: Option<f64>,
    pub temperature: Option<f64>,
    pub axial_resistivity: Option<f64>,
    pub membrane_capacitance: Option<f64>,
    pub ion_data: BTreeMap<String, IonData>,
    pub reversal_potential_method: BTreeMap<String, MechDesc>,
    #[serde(skip)]
    pub discretization: Option<CvPolicy>,
}

/// Global properties for the cable-cell kind: default parameters, the ion
/// species table (name → valence) and simulation-wide switches.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalProperties {
    pub default_parameters: CableParams,
    pub ion_species: BTreeMap<String, i32>,
    pub coalesce_synapses: bool,
    /// Non-physical voltage check bound in mV; `None` disables the check.
    pub membrane_voltage_limit: Option<f64>,
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self {
            default_parameters: CableParams::default(),
            ion_species: BTreeMap::new(),
            coalesce_synapses: true,
            membrane_voltage_limit: None,
        }
    }
}

impl GlobalProperties {
    /// The conventional NEURON-compatible defaults: na/k/ca species, -65 mV,
    /// 6.3 °C, 35.4 Ω·cm, 0.01 F/m².
    pub fn neuron_defaults() -> Self {
        let mut ion_species = BTreeMap::new();
        ion_species.insert("na".to_string(), 1);
        ion_species.insert("k".to_string(), 1);
        ion_species.insert("ca".to_string(), 2);

        let mut ion_data = BTreeMap::new();
        ion_data.insert(
            "na".to_string(),
            IonData {
                init_int_concentration: Some(10.0),
                init_ext_concentration: Some(140.0),
                init_reversal_potential: Some(115.0 - 65.0),
            },
        );
        ion_data.insert(
            "k".to_string(),
            IonData {
                init_int_concentration: Some(54.4),
                init_ext_concentration: Some(2.5),
                init_reversal_potential: Some(-12.0 - 65.0),
            },
        );
        ion_data.insert(
            "ca".to_string(),
            IonData {
                init_int_concentration: Some(5e-5),
                init_ext_concentration: Some(2.0),
                init_reversal_potential: Some(132.4579341637009),
            },
        );

        Self {
            default_parameters: CableParams {
                init_membrane_potential: Some(-65.0),
                temperature: Some(279.45),
                axial_resistivity: Some(35.4),
                membrane_capacitance: Some(0.01),
                ion_data,
                reversal_potential_method: BTreeMap::new(),
                discretization: None,
            },
            ion_species,
            coalesce_synapses: true,
            membrane_voltage_limit: None,
        }
    }
}

/// Assert that every default needed by the discretization is present.
pub fn check_global_properties(props: &GlobalProperties) -> Result<(), CableCellError> {
    let p = &props.default_parameters;
    if p.init_membrane_potential.is_none() {
        return Err(CableCellError::IncompleteGlobalProperties(
            "init_membrane_potential",
        ));
    }
    if p.temperature.is_none() {
        return Err(CableCellError::IncompleteGlobalProperties("temperature"));
    }
    if p.axial_resistivity.is_none() {
        return Err(CableCellError::IncompleteGlobalProperties(
            "axial_resistivity",
        ));
    }
    if p.membrane_capacitance.is_none() {
        return Err(CableCellError::IncompleteGlobalProperties(
            "membrane_capacitance",
        ));
    }
    for (ion, _) in &props.ion_species {
        let data = p.ion_data.get(ion).copied().unwrap_or_default();
        if data.init_int_concentration.is_none() {
            return Err(CableCellError::IncompleteIonDefaults(
                ion.clone(),
                "init_int_concentration",
            ));
        }
        if data.init_ext_concentration.is_none() {
            return Err(CableCellError::IncompleteIonDefaults(
                ion.clone(),
                "init_ext_concentration",
            ));
        }
        if data.init_reversal_potential.is_none() {
            return Err(CableCellError::IncompleteIonDefaults(
                ion.clone(),
                "init_reversal_potential",
            ));
        }
    }
    Ok(())
}

/// Current-clamp stimulus: piecewise-linear envelope `(t [ms], i [nA])`
/// with optional sinusoidal modulation. Current is zero before the first
/// envelope point and holds the last amplitude after the final point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IClamp {
    pub envelope: Vec<(f64, f64)>,
    /// Modulation frequency in kHz; zero means no modulation.
    pub frequency: f64,
    /// Modulation phase in radians.
    pub phase: f64,
}

impl IClamp {
    /// A square pulse of `amplitude` nA over `[delay, delay+duration)`.
    pub fn pulse(delay: f64, duration: f64, amplitude: f64) -> Self {
        Self {
            envelope: vec![
                (delay, amplitude),
                (delay + duration, amplitude),
                (delay + duration, 0.0),
            ],
            frequency: 0.0,
            phase: 0.0,
        }
    }

    pub fn with_modulation(mut self, frequency: f64, phase: f64) -> Self {
        self.frequency = frequency;
        self.phase = phase;
        self
    }
}

/// Spike detector with threshold in mV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDetector {
    pub threshold: f64,
}

/// A placed item with its cell-local id.
#[derive(Debug, Clone, PartialEq)]
pub struct Placed<T> {
    pub lid: u32,
    pub loc: Location,
    pub item: T,
}

/// Paintable decorations applied to regions.
#[derive(Debug, Clone, PartialEq)]
pub enum Paintable {
    InitMembranePotential(f64),
    Temperature(f64),
    AxialResistivity(f64),
    MembraneCapacitance(f64),
    IonInitIntConcentration(String, f64),
    IonInitExtConcentration(String, f64),
    IonInitReversalPotential(String, f64),
    Density(MechDesc),
}

/// Placeable decorations applied at locset locations.
#[derive(Debug, Clone, PartialEq)]
pub enum Placeable {
    Synapse(MechDesc),
    Junction(MechDesc),
    Clamp(IClamp),
    Detector(ThresholdDetector),
}

/// The decoration list of a cell, in application order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decor {
    paintings: Vec<(Region, Paintable)>,
    placements: Vec<(Locset, Placeable)>,
    pub defaults: CableParams,
}

impl Decor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paint(mut self, region: Region, what: Paintable) -> Self {
        self.paintings.push((region, what));
        self
    }

    pub fn place(mut self, locset: Locset, what: Placeable) -> Self {
        self.placements.push((locset, what));
        self
    }

    pub fn set_default(mut self, defaults: CableParams) -> Self {
        self.defaults = defaults;
        self
    }
}

/// Painted parameter maps and placed instances, collated from a decor
/// against a resolved morphology.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    pub init_membrane_potential: McableMap<f64>,
    pub temperature: McableMap<f64>,
    pub axial_resistivity: McableMap<f64>,
    pub membrane_capacitance: McableMap<f64>,
    pub ion_init_iconc: BTreeMap<String, McableMap<f64>>,
    pub ion_init_econc: BTreeMap<String, McableMap<f64>>,
    pub ion_init_revpot: BTreeMap<String, McableMap<f64>>,
    /// Density paints per mechanism name, in paint order; cables may repeat
    /// or overlap across paints.
    pub density: BTreeMap<String, Vec<(Cable, MechDesc)>>,
    pub synapses: BTreeMap<String, Vec<Placed<MechDesc>>>,
    pub junctions: BTreeMap<String, Vec<Placed<MechDesc>>>,
    pub stimuli: Vec<Placed<IClamp>>,
    pub detectors: Vec<Placed<ThresholdDetector>>,
}

/// A cable cell: morphology, its embedding, and collated decorations.
#[derive(Debug, Clone)]
pub struct CableCell {
    morphology: Morphology,
    embedding: PwlinEmbedding,
    assignments: Assignments,
    defaults: CableParams,
    num_sources: u32,
    num_targets: u32,
    num_junction_sites: u32,
}

impl CableCell {
    pub fn new(morphology: Morphology, decor: Decor) -> Result<Self, CableCellError> {
        let embedding = PwlinEmbedding::new(&morphology);
        let mut asg = Assignments::default();

        for (region, what) in &decor.paintings {
            let extent = region.resolve(&morphology, &embedding)?;
            for cable in extent.cables() {
                match what {
                    Paintable::InitMembranePotential(v) => {
                        asg.init_membrane_potential.insert(*cable, *v);
                    }
                    Paintable::Temperature(v) => {
                        asg.temperature.insert(*cable, *v);
                    }
                    Paintable::AxialResistivity(v) => {
                        asg.axial_resistivity.insert(*cable, *v);
                    }
                    Paintable::MembraneCapacitance(v) => {
                        asg.membrane_capacitance.insert(*cable, *v);
                    }
                    Paintable::IonInitIntConcentration(ion, v) => {
                        asg.ion_init_iconc
                            .entry(ion.clone())
                            .or_default()
                            .insert(*cable, *v);
                    }
                    Paintable::IonInitExtConcentration(ion, v) => {
                        asg.ion_init_econc
                            .entry(ion.clone())
                            .or_default()
                            .insert(*cable, *v);
                    }
                    Paintable::IonInitReversalPotential(ion, v) => {
                        asg.ion_init_revpot
                            .entry(ion.clone())
                            .or_default()
                            .insert(*cable, *v);
                    }
                    Paintable::Density(mech) => {
                        asg.density
                            .entry(mech.name.clone())
                            .or_default()
                            .push((*cable, mech.clone()));
                    }
                }
            }
        }

        let mut num_sources = 0u32;
        let mut num_targets = 0u32;
        let mut num_junction_sites = 0u32;
        for (locset, what) in &decor.placements {
            for loc in locset.resolve(&morphology)? {
                match what {
                    Placeable::Synapse(mech) => {
                        asg.synapses.entry(mech.name.clone()).or_default().push(
                            Placed {
                                lid: num_targets,
                                loc,
                                item: mech.clone(),
                            },
                        );
                        num_targets += 1;
                    }
                    Placeable::Junction(mech) => {
                        asg.junctions.entry(mech.name.clone()).or_default().push(
                            Placed {
                                lid: num_junction_sites,
                                loc,
                                item: mech.clone(),
                            },
                        );
                        num_junction_sites += 1;
                    }
                    Placeable::Clamp(clamp) => {
                        asg.stimuli.push(Placed {
                            lid: 0,
                            loc,
                            item: clamp.clone(),
                        });
                    }
                    Placeable::Detector(det) => {
                        asg.detectors.push(Placed {
                            lid: num_sources,
                            loc,
                            item: *det,
                        });
                        num_sources += 1;
                    }
                }
            }
        }

        Ok(Self {
            morphology,
            embedding,
            assignments: asg,
            defaults: decor.defaults,
            num_sources,
            num_targets,
            num_junction_sites,
        })
    }

    pub fn morphology(&self) -> &Morphology {
        &self.morphology
    }

    pub fn embedding(&self) -> &PwlinEmbedding {
        &self.embedding
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    pub fn defaults(&self) -> &CableParams {
        &self.defaults
    }

    pub fn num_sources(&self) -> u32 {
        self.num_sources
    }

    pub fn num_targets(&self) -> u32 {
        self.num_targets
    }

    pub fn num_junction_sites(&self) -> u32 {
        self.num_junction_sites
    }

    /// Support of a painted density mechanism, for probe resolution.
    pub fn density_support(&self, name: &str) -> Mextent {
        match self.assignments.density.get(name) {
            Some(entries) => Mextent::from_cables(entries.iter().map(|(c, _)| *c).collect()),
            None => Mextent::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cable_morph::{Point, SegmentTree};

    fn soma_cell() -> Morphology {
        let mut tree = SegmentTree::new();
        tree.append(
            None,
            Point::new(0.0, 0.0, 0.0, 5.0),
            Point::new(10.0, 0.0, 0.0, 5.0),
            1,
        )
        .unwrap();
        Morphology::try_from_tree(tree).unwrap()
    }

    #[test]
    fn placement_assigns_contiguous_lids() {
        let decor = Decor::new()
            .place(
                Locset::Location(Location::new(0, 0.5)),
                Placeable::Synapse(MechDesc::new("expsyn")),
            )
            .place(
                Locset::Location(Location::new(0, 0.5)),
                Placeable::Synapse(MechDesc::new("expsyn")),
            )
            .place(
                Locset::Location(Location::new(0, 0.0)),
                Placeable::Detector(ThresholdDetector { threshold: -10.0 }),
            );
        let cell = CableCell::new(soma_cell(), decor).unwrap();
        assert_eq!(cell.num_targets(), 2);
        assert_eq!(cell.num_sources(), 1);
        let placed = &cell.assignments().synapses["expsyn"];
        assert_eq!(placed[0].lid, 0);
        assert_eq!(placed[1].lid, 1);
    }

    #[test]
    fn missing_global_default_is_reported() {
        let mut props = GlobalProperties::neuron_defaults();
        props.default_parameters.membrane_capacitance = None;
        assert_eq!(
            check_global_properties(&props),
            Err(CableCellError::IncompleteGlobalProperties(
                "membrane_capacitance"
            ))
        );
    }
}
