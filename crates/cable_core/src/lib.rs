#![forbid(unsafe_code)]

//! Common identifier types, spike records and the fixed-layout spike wire
//! codec shared by every crate in the workspace.
//!
//! Unit conventions throughout the workspace:
//! time [ms], voltage [mV], current density [A/m²], conductance [µS],
//! length [µm], area [µm²], capacitance [pF], axial resistivity [Ω·cm],
//! concentration [mM], temperature [K].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global cell identifier, unique across all ranks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CellGid(pub u32);

/// Cell-local identifier for a source, target or junction site.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CellLid(pub u32);

/// A `(gid, lid)` pair naming one site on one cell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct CellMember {
    pub gid: CellGid,
    pub lid: CellLid,
}

impl CellMember {
    pub fn new(gid: u32, lid: u32) -> Self {
        Self {
            gid: CellGid(gid),
            lid: CellLid(lid),
        }
    }
}

/// The kinds of cell a recipe may describe. Only `Cable` cells are simulated
/// by this core; the other kinds are owned by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Cable,
    Lif,
    SpikeSource,
    Benchmark,
}

/// A threshold crossing emitted by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub source: CellMember,
    pub time: f64,
}

impl Spike {
    pub fn new(gid: u32, lid: u32, time: f64) -> Self {
        Self {
            source: CellMember::new(gid, lid),
            time,
        }
    }
}

/// Byte length of one spike record on the wire.
pub const SPIKE_WIRE_BYTES: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("spike payload length {0} is not a multiple of {SPIKE_WIRE_BYTES}")]
    PayloadLength(usize),
}

/// Encode spikes as fixed-size records `{source_gid: u32, source_lid: u32,
/// time: f32}`, little-endian, matching the exchange wire format.
pub fn encode_spikes(spikes: &[Spike], out: &mut Vec<u8>) {
    out.reserve(spikes.len() * SPIKE_WIRE_BYTES);
    for s in spikes {
        out.extend_from_slice(&s.source.gid.0.to_le_bytes());
        out.extend_from_slice(&s.source.lid.0.to_le_bytes());
        out.extend_from_slice(&(s.time as f32).to_le_bytes());
    }
}

/// Decode a spike payload previously produced by [`encode_spikes`].
pub fn decode_spikes(bytes: &[u8]) -> Result<Vec<Spike>, WireError> {
    if bytes.len() % SPIKE_WIRE_BYTES != 0 {
        return Err(WireError::PayloadLength(bytes.len()));
    }
    let mut spikes = Vec::with_capacity(bytes.len() / SPIKE_WIRE_BYTES);
    for rec in bytes.chunks_exact(SPIKE_WIRE_BYTES) {
        let gid = u32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
        let lid = u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]);
        let time = f32::from_le_bytes([rec[8], rec[9], rec[10], rec[11]]);
        spikes.push(Spike::new(gid, lid, time as f64));
    }
    Ok(spikes)
}

/// Sentinel for "no parent" in CV and branch parent vectors.
pub const NO_PARENT: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_wire_roundtrip() {
        let spikes = vec![
            Spike::new(0, 0, 0.125),
            Spike::new(7, 2, 3.5),
            Spike::new(u32::MAX, 1, 1000.25),
        ];
        let mut bytes = Vec::new();
        encode_spikes(&spikes, &mut bytes);
        assert_eq!(bytes.len(), spikes.len() * SPIKE_WIRE_BYTES);
        let decoded = decode_spikes(&bytes).unwrap();
        assert_eq!(decoded, spikes);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = vec![0u8; SPIKE_WIRE_BYTES + 3];
        assert_eq!(
            decode_spikes(&bytes),
            Err(WireError::PayloadLength(SPIKE_WIRE_BYTES + 3))
        );
    }
}
