use cable_cell::{
    CableCell, CableParams, Decor, GlobalProperties, IClamp, MechDesc, Paintable, Placeable,
    ThresholdDetector,
};
use cable_core::CellGid;
use cable_events::SpikeEvent;
use cable_group::{CableCellGroup, ProbeAddress, SamplePolicy, SampleRequest};
use cable_mech::default_catalogue;
use cable_morph::{CvPolicy, Location, Locset, Morphology, Point, Region, SegmentTree};
use std::collections::BTreeMap;

const PI: f64 = std::f64::consts::PI;

fn soma_morphology(len: f64, radius: f64) -> Morphology {
    let mut tree = SegmentTree::new();
    tree.append(
        None,
        Point::new(0.0, 0.0, 0.0, radius),
        Point::new(len, 0.0, 0.0, radius),
        1,
    )
    .unwrap();
    Morphology::try_from_tree(tree).unwrap()
}

fn single_cv_params() -> CableParams {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::Single);
    params
}

fn make_group(decor: Decor, probes: Vec<ProbeAddress>) -> CableCellGroup {
    let cell = CableCell::new(soma_morphology(10.0, 5.0), decor).unwrap();
    let global = GlobalProperties::neuron_defaults();
    let catalogue = default_catalogue();
    let mut probe_map = BTreeMap::new();
    probe_map.insert(CellGid(0), probes);
    CableCellGroup::new(
        vec![cell],
        vec![CellGid(0)],
        &global,
        &catalogue,
        &BTreeMap::new(),
        0,
        vec![0],
        1,
        &probe_map,
    )
    .unwrap()
}

#[test]
fn linear_ramp_crossing_time_is_interpolated_exactly() {
    // A pure capacitor under constant clamp ramps linearly: V' = I/C.
    let amplitude = 0.05; // nA
    let decor = Decor::new()
        .set_default(single_cv_params())
        .place(
            Locset::Location(Location::new(0, 0.5)),
            Placeable::Clamp(IClamp::pulse(0.0, 100.0, amplitude)),
        )
        .place(
            Locset::Location(Location::new(0, 0.5)),
            Placeable::Detector(ThresholdDetector { threshold: 0.0 }),
        );
    let mut group = make_group(decor, vec![]);

    let area = 2.0 * PI * 5.0 * 10.0;
    let capacitance = 0.01 * area; // pF
    let slope = 1000.0 * amplitude / capacitance; // mV/ms
    let expect = 65.0 / slope;

    let dt = 0.025;
    let result = group.advance(20.0, dt, &[vec![]], &[]).unwrap();
    assert_eq!(result.spikes.len(), 1);
    let spike = result.spikes[0];
    assert_eq!(spike.source.gid, CellGid(0));
    assert!(
        (spike.time - expect).abs() <= dt / 1e4,
        "spike at {} expected {expect}",
        spike.time
    );
}

#[test]
fn expsyn_event_depolarizes_after_delivery() {
    let decor = Decor::new()
        .set_default(single_cv_params())
        .paint(Region::All, Paintable::Density(MechDesc::new("pas")))
        .place(
            Locset::Location(Location::new(0, 0.5)),
            Placeable::Synapse(MechDesc::new("expsyn")),
        );
    let mut group = make_group(decor, vec![]);

    let v0 = group.voltage_at(CellGid(0), Location::new(0, 0.5)).unwrap();

    // No events: passive cell holds its resting state near e_pas.
    group.advance(1.0, 0.025, &[vec![]], &[]).unwrap();
    let v_rest = group.voltage_at(CellGid(0), Location::new(0, 0.5)).unwrap();
    assert!((v_rest - v0).abs() < 0.5);

    // One synaptic event at t = 1.5 ms.
    let lanes = vec![vec![SpikeEvent::new(0, 1.5, 0.01)]];
    group.advance(3.0, 0.025, &lanes, &[]).unwrap();
    let v_after = group.voltage_at(CellGid(0), Location::new(0, 0.5)).unwrap();
    assert!(
        v_after > v_rest + 1.0,
        "expected EPSP, got {v_rest} -> {v_after}"
    );
}

#[test]
fn reset_restores_initial_state_and_digest() {
    let decor = Decor::new()
        .set_default(single_cv_params())
        .paint(Region::All, Paintable::Density(MechDesc::new("hh")))
        .place(
            Locset::Location(Location::new(0, 0.5)),
            Placeable::Clamp(IClamp::pulse(1.0, 1.0, 0.1)),
        );
    let mut group = make_group(decor, vec![]);
    let digest0 = group.snapshot_digest();

    group.advance(5.0, 0.025, &[vec![]], &[]).unwrap();
    assert_ne!(group.snapshot_digest(), digest0);

    group.reset();
    assert_eq!(group.snapshot_digest(), digest0);

    // Replaying the same epoch reproduces the same state.
    group.advance(5.0, 0.025, &[vec![]], &[]).unwrap();
    let digest1 = group.snapshot_digest();
    group.reset();
    group.advance(5.0, 0.025, &[vec![]], &[]).unwrap();
    assert_eq!(group.snapshot_digest(), digest1);
}

#[test]
fn exact_sampling_lands_on_requested_times() {
    let decor = Decor::new()
        .set_default(single_cv_params())
        .paint(Region::All, Paintable::Density(MechDesc::new("pas")));
    let mut group = make_group(
        decor,
        vec![ProbeAddress::MembraneVoltage(Locset::Location(
            Location::new(0, 0.5),
        ))],
    );

    let requests = vec![SampleRequest {
        sampler: 0,
        probe: cable_core::CellMember::new(0, 0),
        times: vec![0.3, 0.71, 1.13],
        policy: SamplePolicy::Exact,
    }];
    let result = group.advance(2.0, 0.025, &[vec![]], &requests).unwrap();
    let times: Vec<f64> = result.samples.iter().map(|s| s.time).collect();
    assert_eq!(times, vec![0.3, 0.71, 1.13]);
    for record in &result.samples {
        assert_eq!(record.values.len(), 1);
        assert!((record.values[0] - -65.0).abs() < 1.0);
    }
}

#[test]
fn sampling_an_unknown_probe_is_an_error() {
    let decor = Decor::new()
        .set_default(single_cv_params())
        .paint(Region::All, Paintable::Density(MechDesc::new("pas")));
    // The cell is local but carries no probes.
    let mut group = make_group(decor, vec![]);

    let requests = vec![SampleRequest {
        sampler: 0,
        probe: cable_core::CellMember::new(0, 3),
        times: vec![0.5],
        policy: SamplePolicy::Lax,
    }];
    let err = group.advance(1.0, 0.025, &[vec![]], &requests);
    assert!(matches!(
        err,
        Err(cable_group::GroupError::NoSuchProbe { gid: 0, lid: 3 })
    ));
}

#[test]
fn voltage_bound_check_reports_divergence() {
    let decor = Decor::new()
        .set_default(single_cv_params())
        .place(
            Locset::Location(Location::new(0, 0.5)),
            Placeable::Clamp(IClamp::pulse(0.0, 1000.0, 100.0)),
        );
    let cell = CableCell::new(soma_morphology(10.0, 5.0), decor).unwrap();
    let mut global = GlobalProperties::neuron_defaults();
    global.membrane_voltage_limit = Some(100.0);
    let catalogue = default_catalogue();
    let mut group = CableCellGroup::new(
        vec![cell],
        vec![CellGid(0)],
        &global,
        &catalogue,
        &BTreeMap::new(),
        0,
        vec![0],
        1,
        &BTreeMap::new(),
    )
    .unwrap();

    let err = group.advance(100.0, 0.025, &[vec![]], &[]);
    assert!(matches!(
        err,
        Err(cable_group::GroupError::VoltageOutOfBounds { .. })
    ));
}
