//! The communicator: owns the rank's connection table, performs the
//! epoch-barrier spike gather and expands global spikes into per-cell event
//! lanes.

use crate::distributed::Distributed;
use crate::GatheredVector;
use cable_core::{CellLid, CellMember, Spike};
use cable_events::SpikeEvent;

/// A connection as collected from the recipe: the target cell is local to
/// this rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionInput {
    pub source: CellMember,
    pub target_cell_index: u32,
    pub target_lid: CellLid,
    pub weight: f64,
    pub delay: f64,
}

/// Resolved connection table row; sorted by source within each source-rank
/// partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub source: CellMember,
    pub destination: CellLid,
    pub weight: f64,
    pub delay: f64,
    /// Index of the target cell's event lane on this rank.
    pub index_on_domain: u32,
}

fn make_event(c: &Connection, s: &Spike) -> SpikeEvent {
    SpikeEvent {
        target: c.destination,
        time: s.time + c.delay,
        weight: c.weight,
    }
}

pub struct Communicator {
    num_domains: usize,
    connections: Vec<Connection>,
    /// Partition of `connections` by the source's owning domain.
    connection_part: Vec<usize>,
    min_delay: f64,
    num_spikes: u64,
    num_local_events: u64,
}

impl Communicator {
    /// Build the connection table. `gid_domain` maps every gid to its
    /// owning rank; `conns` lists the connections terminating on this rank.
    pub fn new(
        conns: Vec<ConnectionInput>,
        gid_domain: &[u32],
        dist: &dyn Distributed,
    ) -> Self {
        let num_domains = dist.size();

        let mut connections: Vec<Connection> = conns
            .iter()
            .map(|c| Connection {
                source: c.source,
                destination: c.target_lid,
                weight: c.weight,
                delay: c.delay,
                index_on_domain: c.target_cell_index,
            })
            .collect();

        // Sort by (source domain, source id); equal sources keep recipe
        // order so event expansion is deterministic.
        let domain_of =
            |c: &Connection| gid_domain.get(c.source.gid.0 as usize).copied().unwrap_or(0);
        connections.sort_by(|a, b| {
            (domain_of(a), a.source)
                .cmp(&(domain_of(b), b.source))
        });

        let mut connection_part = Vec::with_capacity(num_domains + 1);
        connection_part.push(0);
        let mut cursor = 0;
        for d in 0..num_domains {
            while cursor < connections.len() && domain_of(&connections[cursor]) as usize == d {
                cursor += 1;
            }
            connection_part.push(cursor);
        }

        let local_min = connections
            .iter()
            .map(|c| c.delay)
            .fold(f64::INFINITY, f64::min);
        let min_delay = dist.min_f64(local_min);
        log::debug!(
            "communicator: {} connections, min delay {min_delay}",
            connections.len()
        );

        Self {
            num_domains,
            connections,
            connection_part,
            min_delay,
            num_spikes: 0,
            num_local_events: 0,
        }
    }

    /// The minimum connection delay of the global network; sets the epoch
    /// cadence. Infinite when no connections exist anywhere.
    pub fn min_delay(&self) -> f64 {
        self.min_delay
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Exchange spikes with the peer ranks: all-gather of spike counts and
    /// payloads. Local spikes are sorted by source first so per-rank ranges
    /// arrive ordered.
    pub fn exchange(
        &mut self,
        mut local_spikes: Vec<Spike>,
        dist: &dyn Distributed,
    ) -> GatheredVector<Spike> {
        local_spikes.sort_by(|a, b| {
            (a.source, a.time)
                .partial_cmp(&(b.source, b.time))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let gathered = dist.gather_spikes(&local_spikes);
        self.num_spikes += gathered.count() as u64;
        gathered
    }

    /// Expand global spikes into per-cell event lanes. Each lane ends up
    /// sorted by time, ties preserving source order.
    pub fn make_event_queues(
        &mut self,
        global_spikes: &GatheredVector<Spike>,
        queues: &mut [Vec<SpikeEvent>],
    ) {
        for domain in 0..self.num_domains {
            let spikes = global_spikes.values_for(domain);
            let conns =
                &self.connections[self.connection_part[domain]..self.connection_part[domain + 1]];
            if spikes.is_empty() || conns.is_empty() {
                continue;
            }

            if spikes.len() < conns.len() {
                for spike in spikes {
                    let lo = conns.partition_point(|c| c.source < spike.source);
                    let hi = conns.partition_point(|c| c.source <= spike.source);
                    for c in &conns[lo..hi] {
                        queues[c.index_on_domain as usize].push(make_event(c, spike));
                        self.num_local_events += 1;
                    }
                }
            } else {
                for c in conns {
                    let lo = spikes.partition_point(|s| s.source < c.source);
                    let hi = spikes.partition_point(|s| s.source <= c.source);
                    for spike in &spikes[lo..hi] {
                        queues[c.index_on_domain as usize].push(make_event(c, spike));
                        self.num_local_events += 1;
                    }
                }
            }
        }

        for queue in queues.iter_mut() {
            queue.sort_by(|a, b| {
                a.time
                    .partial_cmp(&b.time)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    pub fn num_spikes(&self) -> u64 {
        self.num_spikes
    }

    pub fn num_local_events(&self) -> u64 {
        self.num_local_events
    }

    pub fn reset(&mut self) {
        self.num_spikes = 0;
        self.num_local_events = 0;
    }
}
