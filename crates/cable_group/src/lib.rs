#![forbid(unsafe_code)]

//! The cable-cell group: exclusive owner of its cells' shared state vectors,
//! mechanism instances, Hines solver scratch, threshold watcher and sample
//! buffers, driving the per-epoch integration loop.

mod group;
mod probes;
mod shared_state;
mod streams;
mod threshold;

pub use group::{AdvanceResult, CableCellGroup, SampleRecord, SampleRequest, SamplerId};
pub use probes::{PointInfo, ProbeAddress, ProbeMetadata, SamplePolicy};
pub use shared_state::{IonState, SharedState, StimulusState};
pub use streams::{DeliverableEventStream, SampleEventStream, StagedEvent, StagedSample};
pub use threshold::{Crossing, ThresholdWatcher};

use cable_cell::CableCellError;
use cable_fvm::LayoutError;
use cable_mech::MechanismError;
use cable_solver::SolverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    CableCell(#[from] CableCellError),
    #[error(transparent)]
    Mechanism(#[from] MechanismError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("voltage solution out of bounds ({value} mV) for t in [{t0}, {t1}]")]
    VoltageOutOfBounds { t0: f64, t1: f64, value: f64 },
    #[error("inconsistent times across cells in group")]
    InconsistentTime,
    #[error("no probe {lid} on cell {gid}")]
    NoSuchProbe { gid: u32, lid: u32 },
    #[error("gap junction peer CV {peer} outside this group (CVs {lo}..{hi})")]
    GapJunctionOutsideGroup { peer: u32, lo: u32, hi: u32 },
    #[error("advance called with non-positive dt_max {0}")]
    BadDtMax(f64),
}
