use cable_cell::{
    CableCell, CableParams, Decor, GlobalProperties, MechDesc, Paintable, Placeable,
};
use cable_fvm::{axial_current, build_mechanism_data, discretize_cell, interpolate_voltage};
use cable_mech::default_catalogue;
use cable_morph::{Cable, CvPolicy, Location, Locset, Morphology, Point, Region, SegmentTree};

fn cylinder_morphology(len: f64, radius: f64) -> Morphology {
    let mut tree = SegmentTree::new();
    tree.append(
        None,
        Point::new(0.0, 0.0, 0.0, radius),
        Point::new(len, 0.0, 0.0, radius),
        3,
    )
    .unwrap();
    Morphology::try_from_tree(tree).unwrap()
}

fn cylinder_cell(len: f64, radius: f64, policy: CvPolicy) -> CableCell {
    let mut params = CableParams::default();
    params.discretization = Some(policy);
    CableCell::new(
        cylinder_morphology(len, radius),
        Decor::new().set_default(params),
    )
    .unwrap()
}

#[test]
fn voltage_interpolation_is_linear_in_position() {
    let n_cv = 8u32;
    let cell = cylinder_cell(200.0, 1.0, CvPolicy::FixedPerBranch(n_cv));
    let global = GlobalProperties::neuron_defaults();
    let d = discretize_cell(&cell, &global).unwrap();

    // Reference midpoints per CV on the uniform cable.
    let midpoint = |cv: u32| (f64::from(cv) + 0.5) / f64::from(n_cv);

    for k in 0..=100 {
        let pos = k as f64 / 100.0;
        let vi = interpolate_voltage(&cell, &d, 0, Location::new(0, pos));

        // Coefficients sum to one.
        assert!(
            (vi.proximal_coef + vi.distal_coef - 1.0).abs() <= 32.0 * f64::EPSILON,
            "pos {pos}: coefficient sum {}",
            vi.proximal_coef + vi.distal_coef
        );

        // Interpolation reconstructs any voltage field linear in branch
        // position exactly, including extrapolation beyond the terminal
        // reference midpoints.
        let recon = vi.proximal_coef * midpoint(vi.proximal_cv)
            + vi.distal_coef * midpoint(vi.distal_cv);
        assert!(
            (recon - pos).abs() <= 32.0 * f64::EPSILON,
            "pos {pos}: reconstructed {recon}"
        );
    }
}

#[test]
fn axial_current_coefficients_match_face_conductance() {
    let cell = cylinder_cell(100.0, 2.0, CvPolicy::FixedPerBranch(2));
    let global = GlobalProperties::neuron_defaults();
    let d = discretize_cell(&cell, &global).unwrap();
    assert_eq!(d.size(), 2);

    let vi = axial_current(&cell, &d, 0, Location::new(0, 0.5));
    let distal_cv = vi.distal_cv as usize;
    assert_eq!(vi.proximal_coef, d.face_conductance[distal_cv]);
    assert_eq!(vi.distal_coef, -d.face_conductance[distal_cv]);
}

#[test]
fn density_parameters_area_weighted_across_paints() {
    // Two overlapping pas paints with different g; the CV value must be the
    // area-weighted mean over painted cable area.
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let decor = Decor::new()
        .set_default(params)
        .paint(
            Region::Cable(Cable::new(0, 0.0, 0.6)),
            Paintable::Density(MechDesc::new("pas").set("g", 0.002)),
        )
        .paint(
            Region::Cable(Cable::new(0, 0.4, 1.0)),
            Paintable::Density(MechDesc::new("pas").set("g", 0.004)),
        );
    let cell = CableCell::new(cylinder_morphology(100.0, 1.0), decor).unwrap();
    let global = GlobalProperties::neuron_defaults();
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let m = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0).unwrap();

    let config = &m.mechanisms["pas"];
    assert_eq!(config.cv, vec![0]);
    // Painted area fractions: 0.6 at g=0.002 plus 0.6 at g=0.004 of a unit
    // cylinder; overlap double-counts area by construction.
    let g_expect = (0.6 * 0.002 + 0.6 * 0.004) / 1.2;
    let g_col = &config
        .param_values
        .iter()
        .find(|(name, _)| name == "g")
        .unwrap()
        .1;
    assert!(
        (g_col[0] - g_expect).abs() <= 4.0 * f64::EPSILON * g_expect,
        "got {} expected {g_expect}",
        g_col[0]
    );
    // norm_area counts covered area, saturating at the full CV.
    assert!((config.norm_area[0] - 1.2).abs() < 1e-12);
}

#[test]
fn synapse_coalescing_multiplicity_and_targets() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let mid = Locset::Location(Location::new(0, 0.5));
    let decor = Decor::new()
        .set_default(params)
        .place(
            mid.clone(),
            Placeable::Synapse(MechDesc::new("expsyn").set("e", 0.0).set("tau", 0.2)),
        )
        .place(
            mid.clone(),
            Placeable::Synapse(MechDesc::new("expsyn").set("e", 0.0).set("tau", 0.2)),
        )
        .place(
            mid.clone(),
            Placeable::Synapse(MechDesc::new("expsyn").set("e", 0.1).set("tau", 0.2)),
        )
        .place(
            mid,
            Placeable::Synapse(MechDesc::new("expsyn").set("e", 0.1).set("tau", 0.2)),
        );
    let cell = CableCell::new(cylinder_morphology(20.0, 1.0), decor).unwrap();
    let global = GlobalProperties::neuron_defaults();
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let m = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0).unwrap();

    let config = &m.mechanisms["expsyn"];
    assert_eq!(config.cv.len(), 2);
    assert_eq!(config.cv[0], config.cv[1]);
    assert_eq!(config.multiplicity, vec![2, 2]);
    assert_eq!(config.target, vec![0, 1, 2, 3]);
    assert_eq!(m.n_target, 4);

    let e_col = &config
        .param_values
        .iter()
        .find(|(name, _)| name == "e")
        .unwrap()
        .1;
    assert_eq!(e_col, &vec![0.0, 0.1]);
}

#[test]
fn coalescing_disabled_keeps_instances_separate() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let mid = Locset::Location(Location::new(0, 0.5));
    let decor = Decor::new()
        .set_default(params)
        .place(
            mid.clone(),
            Placeable::Synapse(MechDesc::new("expsyn")),
        )
        .place(mid, Placeable::Synapse(MechDesc::new("expsyn")));
    let cell = CableCell::new(cylinder_morphology(20.0, 1.0), decor).unwrap();
    let mut global = GlobalProperties::neuron_defaults();
    global.coalesce_synapses = false;
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let m = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0).unwrap();

    let config = &m.mechanisms["expsyn"];
    assert_eq!(config.cv.len(), 2);
    assert!(config.multiplicity.is_empty());
    assert_eq!(config.target, vec![0, 1]);
}

#[test]
fn unknown_ion_is_rejected() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let decor = Decor::new()
        .set_default(params)
        .paint(Region::All, Paintable::Density(MechDesc::new("hh")));
    let cell = CableCell::new(cylinder_morphology(20.0, 1.0), decor).unwrap();
    let mut global = GlobalProperties::neuron_defaults();
    global.ion_species.remove("na");
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let err = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0);
    assert!(matches!(
        err,
        Err(cable_fvm::LayoutError::UnknownIon { .. })
    ));
}

#[test]
fn valence_mismatch_is_rejected() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let decor = Decor::new()
        .set_default(params)
        .paint(Region::All, Paintable::Density(MechDesc::new("cad")));
    let cell = CableCell::new(cylinder_morphology(20.0, 1.0), decor).unwrap();
    let mut global = GlobalProperties::neuron_defaults();
    global.ion_species.insert("ca".to_string(), 1);
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let err = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0);
    assert!(matches!(
        err,
        Err(cable_fvm::LayoutError::ValenceMismatch { expected: 2, got: 1, .. })
    ));
}

#[test]
fn overlapping_concentration_writers_are_rejected() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let decor = Decor::new()
        .set_default(params)
        .paint(
            Region::Cable(Cable::new(0, 0.0, 0.7)),
            Paintable::Density(MechDesc::new("cad")),
        )
        .paint(
            Region::Cable(Cable::new(0, 0.5, 1.0)),
            Paintable::Density(MechDesc::new("cad")),
        );
    let cell = CableCell::new(cylinder_morphology(20.0, 1.0), decor).unwrap();
    let global = GlobalProperties::neuron_defaults();
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let err = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0);
    assert!(matches!(
        err,
        Err(cable_fvm::LayoutError::OverlappingIonWriter { .. })
    ));
}

#[test]
fn nernst_method_instantiates_on_ion_support() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(4));
    let decor = Decor::new().set_default(params).paint(
        Region::Cable(Cable::new(0, 0.0, 0.5)),
        Paintable::Density(MechDesc::new("cad")),
    );
    let cell = CableCell::new(cylinder_morphology(100.0, 1.0), decor).unwrap();
    let mut global = GlobalProperties::neuron_defaults();
    global
        .default_parameters
        .reversal_potential_method
        .insert("ca".to_string(), MechDesc::new("nernst/ca"));
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let m = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0).unwrap();

    let ca = &m.ions["ca"];
    assert!(ca.iconc_written);
    assert!(ca.revpot_written);
    // cad covers the first two of four CVs; nernst rides the same support.
    assert_eq!(ca.cv, vec![0, 1]);
    assert_eq!(m.mechanisms["nernst/ca"].cv, ca.cv);
    // Written region: init starts at zero, reset keeps the painted default.
    assert_eq!(ca.init_iconc, vec![0.0, 0.0]);
    assert!(ca.reset_iconc.iter().all(|&x| (x - 5e-5).abs() < 1e-12));
}

#[test]
fn stimulus_envelope_is_area_scaled() {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::FixedPerBranch(1));
    let decor = Decor::new().set_default(params).place(
        Locset::Location(Location::new(0, 0.5)),
        Placeable::Clamp(cable_cell::IClamp::pulse(5.0, 10.0, 0.1)),
    );
    let cell = CableCell::new(cylinder_morphology(100.0, 1.0), decor).unwrap();
    let global = GlobalProperties::neuron_defaults();
    let catalogue = default_catalogue();
    let d = discretize_cell(&cell, &global).unwrap();
    let m = build_mechanism_data(&global, &catalogue, &cell, &[], &d, 0).unwrap();

    assert_eq!(m.stimuli.cv, vec![0]);
    assert_eq!(m.stimuli.envelope_time[0], vec![5.0, 15.0, 15.0]);
    let scale = 1000.0 / d.cv_area[0];
    let amps = &m.stimuli.envelope_amplitude[0];
    assert!((amps[0] - 0.1 * scale).abs() < 1e-15);
    assert_eq!(amps[2], 0.0);
}
