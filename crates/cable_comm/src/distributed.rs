//! Distributed context: the collective operations the communicator and the
//! gap-junction resolution rely on. `LocalContext` serves single-process
//! runs; `SharedContext` implements the collectives over in-process ranks
//! sharing memory, one context per rank thread.

use crate::GatheredVector;
use cable_core::{decode_spikes, encode_spikes, Spike};
use cable_fvm::GjCvMapEntry;
use std::sync::{Arc, Condvar, Mutex};

pub trait Distributed: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// All-gather of opaque byte payloads; index i holds rank i's payload.
    fn allgather_bytes(&self, bytes: Vec<u8>) -> Vec<Vec<u8>>;

    fn min_f64(&self, value: f64) -> f64 {
        let payloads = self.allgather_bytes(value.to_le_bytes().to_vec());
        payloads
            .iter()
            .map(|b| f64::from_le_bytes(b[..8].try_into().expect("8-byte payload")))
            .fold(f64::INFINITY, f64::min)
    }

    /// Gather spikes from all ranks using the fixed-size wire records;
    /// returns the concatenated payload with its per-rank partition.
    fn gather_spikes(&self, local: &[Spike]) -> GatheredVector<Spike> {
        let mut bytes = Vec::new();
        encode_spikes(local, &mut bytes);
        let payloads = self.allgather_bytes(bytes);

        let mut values = Vec::new();
        let mut partition = vec![0u32];
        for payload in payloads {
            let spikes = decode_spikes(&payload).expect("well-formed spike payload");
            values.extend(spikes);
            partition.push(values.len() as u32);
        }
        GatheredVector { values, partition }
    }

    /// Gather the per-rank gap-junction site maps.
    fn gather_gj_entries(&self, local: &[GjCvMapEntry]) -> Vec<GjCvMapEntry> {
        let mut bytes = Vec::with_capacity(local.len() * 12);
        for e in local {
            bytes.extend_from_slice(&e.site.gid.0.to_le_bytes());
            bytes.extend_from_slice(&e.site.lid.0.to_le_bytes());
            bytes.extend_from_slice(&e.global_cv.to_le_bytes());
        }
        let payloads = self.allgather_bytes(bytes);
        let mut entries = Vec::new();
        for payload in payloads {
            for rec in payload.chunks_exact(12) {
                entries.push(GjCvMapEntry {
                    site: cable_core::CellMember::new(
                        u32::from_le_bytes(rec[0..4].try_into().unwrap()),
                        u32::from_le_bytes(rec[4..8].try_into().unwrap()),
                    ),
                    global_cv: u32::from_le_bytes(rec[8..12].try_into().unwrap()),
                });
            }
        }
        entries
    }

    /// Gather one u32 per rank (per-rank CV counts for the global offsets).
    fn gather_u32(&self, value: u32) -> Vec<u32> {
        self.allgather_bytes(value.to_le_bytes().to_vec())
            .iter()
            .map(|b| u32::from_le_bytes(b[..4].try_into().expect("4-byte payload")))
            .collect()
    }
}

/// Single-rank context.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalContext;

impl Distributed for LocalContext {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allgather_bytes(&self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        vec![bytes]
    }
}

#[derive(Debug)]
struct CollectiveState {
    slots: Vec<Option<Vec<u8>>>,
    deposited: usize,
    collected: usize,
    generation: u64,
}

/// Shared collective over in-process ranks. Every participating thread gets
/// its own `SharedContext` from [`SharedContext::group`]; collectives block
/// until all ranks arrive, matching the per-epoch exchange barrier.
#[derive(Debug)]
pub struct SharedContext {
    rank: usize,
    size: usize,
    shared: Arc<(Mutex<CollectiveState>, Condvar)>,
}

impl SharedContext {
    pub fn group(size: usize) -> Vec<SharedContext> {
        assert!(size > 0);
        let shared = Arc::new((
            Mutex::new(CollectiveState {
                slots: vec![None; size],
                deposited: 0,
                collected: 0,
                generation: 0,
            }),
            Condvar::new(),
        ));
        (0..size)
            .map(|rank| SharedContext {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Distributed for SharedContext {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn allgather_bytes(&self, bytes: Vec<u8>) -> Vec<Vec<u8>> {
        let (lock, cv) = &*self.shared;
        let mut st = lock.lock().expect("collective lock");

        // Wait until the previous round's slot has been recycled.
        while st.slots[self.rank].is_some() {
            st = cv.wait(st).expect("collective wait");
        }

        st.slots[self.rank] = Some(bytes);
        st.deposited += 1;
        let target_gen = if st.deposited == self.size {
            st.generation += 1;
            cv.notify_all();
            st.generation
        } else {
            st.generation + 1
        };

        while st.generation < target_gen {
            st = cv.wait(st).expect("collective wait");
        }

        let result: Vec<Vec<u8>> = st
            .slots
            .iter()
            .map(|s| s.clone().expect("all ranks deposited"))
            .collect();

        st.collected += 1;
        if st.collected == self.size {
            for slot in st.slots.iter_mut() {
                *slot = None;
            }
            st.deposited = 0;
            st.collected = 0;
            cv.notify_all();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_context_is_identity() {
        let ctx = LocalContext;
        assert_eq!(ctx.min_f64(3.5), 3.5);
        let gathered = ctx.gather_spikes(&[Spike::new(1, 0, 2.0)]);
        assert_eq!(gathered.values.len(), 1);
        assert_eq!(gathered.partition, vec![0, 1]);
    }

    #[test]
    fn shared_context_allgathers_in_rank_order() {
        let contexts = SharedContext::group(3);
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                std::thread::spawn(move || {
                    // Two consecutive rounds to exercise slot recycling.
                    let a = ctx.allgather_bytes(vec![ctx.rank() as u8]);
                    let b = ctx.allgather_bytes(vec![10 + ctx.rank() as u8]);
                    (a, b)
                })
            })
            .collect();
        for handle in handles {
            let (a, b) = handle.join().unwrap();
            assert_eq!(a, vec![vec![0u8], vec![1], vec![2]]);
            assert_eq!(b, vec![vec![10u8], vec![11], vec![12]]);
        }
    }
}
