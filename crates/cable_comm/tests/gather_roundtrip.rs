use cable_comm::{Distributed, SharedContext};
use cable_core::Spike;

// Property: after the all-gather every rank holds the identical combined
// spike vector, and the partition delimits exactly each rank's contribution.
#[test]
fn gather_roundtrip_across_ranks() {
    let ranks = 4usize;
    let contexts = SharedContext::group(ranks);

    let spikes_of = |rank: usize| -> Vec<Spike> {
        (0..rank + 1)
            .map(|i| Spike::new(rank as u32 * 10 + i as u32, 0, rank as f64 + i as f64 * 0.25))
            .collect()
    };

    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            std::thread::spawn(move || {
                let local = spikes_of(ctx.rank());
                (ctx.rank(), ctx.gather_spikes(&local))
            })
        })
        .collect();

    let mut expected_values = Vec::new();
    let mut expected_partition = vec![0u32];
    for r in 0..ranks {
        expected_values.extend(spikes_of(r));
        expected_partition.push(expected_values.len() as u32);
    }

    for handle in handles {
        let (rank, gathered) = handle.join().unwrap();
        assert_eq!(gathered.partition, expected_partition, "rank {rank}");
        assert_eq!(gathered.values.len(), expected_values.len());
        for (got, expect) in gathered.values.iter().zip(&expected_values) {
            assert_eq!(got.source, expect.source, "rank {rank}");
            // Times pass through the f32 wire representation.
            assert!((got.time - expect.time).abs() < 1e-6);
        }
        // The per-rank view lands on this rank's own subrange.
        let own = gathered.values_for(rank);
        assert_eq!(own.len(), rank + 1);
        assert_eq!(own[0].source.gid.0, rank as u32 * 10);
    }
}

#[test]
fn min_reduction_agrees_on_all_ranks() {
    let contexts = SharedContext::group(3);
    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            std::thread::spawn(move || {
                let local = [5.0, 1.25, 9.0][ctx.rank()];
                ctx.min_f64(local)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1.25);
    }
}
