use cable_cell::{
    CableCell, CableParams, Decor, GlobalProperties, IClamp, MechDesc, Paintable, Placeable,
    ThresholdDetector,
};
use cable_comm::{Distributed, SharedContext};
use cable_core::{CellGid, CellKind, CellMember};
use cable_group::{ProbeAddress, SamplePolicy};
use cable_morph::{CvPolicy, Location, Locset, Morphology, Point, Region, SegmentTree};
use cable_sim::{CellConnection, CellDescription, Recipe, Simulation};
use cable_events::Schedule;

fn soma_morphology() -> Morphology {
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

fn single_cv_params() -> CableParams {
    let mut params = CableParams::default();
    params.discretization = Some(CvPolicy::Single);
    params
}

// Rank 0 owns a ramp cell spiking shortly after 1 ms; rank 1 owns a passive
// cell subscribed to it over a 2 ms delay. Rank 1 must see the EPSP begin
// in the step containing spike time + delay.
struct TwoRankRecipe;

impl Recipe for TwoRankRecipe {
    fn num_cells(&self) -> u32 {
        2
    }

    fn cell_description(&self, gid: CellGid) -> CellDescription {
        if gid.0 == 0 {
            let decor = Decor::new()
                .set_default(single_cv_params())
                .place(
                    Locset::Location(Location::new(0, 0.5)),
                    Placeable::Clamp(IClamp::pulse(0.0, 100.0, 0.2)),
                )
                .place(
                    Locset::Location(Location::new(0, 0.5)),
                    Placeable::Detector(ThresholdDetector { threshold: 0.0 }),
                );
            CellDescription::Cable(Box::new(
                CableCell::new(soma_morphology(), decor).unwrap(),
            ))
        } else {
            let decor = Decor::new()
                .set_default(single_cv_params())
                .paint(Region::All, Paintable::Density(MechDesc::new("pas")))
                .place(
                    Locset::Location(Location::new(0, 0.5)),
                    Placeable::Synapse(MechDesc::new("expsyn")),
                );
            CellDescription::Cable(Box::new(
                CableCell::new(soma_morphology(), decor).unwrap(),
            ))
        }
    }

    fn cell_kind(&self, _gid: CellGid) -> CellKind {
        CellKind::Cable
    }

    fn connections_on(&self, gid: CellGid) -> Vec<CellConnection> {
        if gid.0 == 1 {
            vec![CellConnection::new((0, 0), 0, 0.01, 2.0)]
        } else {
            Vec::new()
        }
    }

    fn probes(&self, gid: CellGid) -> Vec<ProbeAddress> {
        if gid.0 == 1 {
            vec![ProbeAddress::MembraneVoltage(Locset::Location(
                Location::new(0, 0.5),
            ))]
        } else {
            Vec::new()
        }
    }

    fn global_properties(&self) -> GlobalProperties {
        GlobalProperties::neuron_defaults()
    }
}

#[test]
fn two_rank_spike_exchange_delivers_epsp() {
    let contexts = SharedContext::group(2);
    let dt = 0.025;

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            std::thread::spawn(move || {
                let rank = ctx.rank();
                let mut sim = Simulation::new(&TwoRankRecipe, Box::new(ctx)).unwrap();
                assert_eq!(sim.min_delay(), 2.0);

                let sampler = sim.add_sampler(
                    CellMember::new(1, 0),
                    Schedule::regular(0.0, dt),
                    SamplePolicy::Lax,
                );
                sim.run(6.0, dt).unwrap();

                let spikes: Vec<_> = sim.spikes().to_vec();
                let samples: Vec<(f64, f64)> = sim
                    .samples(sampler)
                    .map(|r| (r.time, r.values[0]))
                    .collect();
                (rank, spikes, samples)
            })
        })
        .collect();

    let mut spike_time = None;
    let mut epsp_onset = None;
    for handle in handles {
        let (rank, spikes, samples) = handle.join().unwrap();
        if rank == 0 {
            assert_eq!(spikes.len(), 1, "rank 0 fires once");
            assert!(spikes[0].time > 1.0 && spikes[0].time < 1.1);
            spike_time = Some(spikes[0].time);
            assert!(samples.is_empty(), "probe is remote to rank 0");
        } else {
            assert!(spikes.is_empty(), "rank 1 stays passive");
            assert!(!samples.is_empty());
            // Find the first sample that departs from rest.
            for (t, v) in samples {
                if (v + 65.0).abs() > 0.05 {
                    epsp_onset = Some(t);
                    break;
                }
            }
        }
    }

    let spike_time = spike_time.expect("rank 0 spike observed");
    let onset = epsp_onset.expect("rank 1 observed the EPSP");
    let t_deliver = spike_time + 2.0;
    assert!(
        onset >= t_deliver - 1e-4,
        "EPSP onset {onset} precedes delivery {t_deliver}"
    );
    assert!(
        onset <= t_deliver + 2.0 * dt,
        "EPSP onset {onset} too late for delivery {t_deliver}"
    );
}
