#![forbid(unsafe_code)]

//! Simulation driver: the recipe interface, domain decomposition over
//! ranks and gap-junction supercells, and the epoch loop that interleaves
//! cell-group integration with the distributed spike exchange.

mod partition;
mod simulation;

pub use partition::{partition_load_balance, DomainDecomposition};
pub use simulation::Simulation;

use cable_cell::CableCell;
use cable_core::{CellGid, CellKind, CellLid, CellMember};
use cable_fvm::GapJunctionConn;
use cable_group::{GroupError, ProbeAddress};
use cable_events::EventGenerator;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("recipe returned a non-cable description for cable cell {0}")]
    BadCellDescription(u32),
    #[error("cell {gid} has kind {kind:?}, which this core does not simulate")]
    UnsupportedCellKind { gid: u32, kind: CellKind },
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Layout(#[from] cable_fvm::LayoutError),
    #[error("connection on cell {0} has non-positive delay {1}")]
    NonPositiveDelay(u32, f64),
}

/// A synaptic connection as described by the recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct CellConnection {
    pub source: CellMember,
    pub target_lid: CellLid,
    pub weight: f64,
    pub delay: f64,
}

impl CellConnection {
    pub fn new(source: (u32, u32), target_lid: u32, weight: f64, delay: f64) -> Self {
        Self {
            source: CellMember::new(source.0, source.1),
            target_lid: CellLid(target_lid),
            weight,
            delay,
        }
    }
}

/// Cell payloads a recipe may return. Only cable cells are simulated here;
/// the other kinds belong to external collaborators and carry no payload.
#[derive(Debug, Clone)]
pub enum CellDescription {
    Cable(Box<CableCell>),
    Lif,
    SpikeSource,
    Benchmark,
}

/// The user-provided model description. Read-only; queried from any thread.
pub trait Recipe: Send + Sync {
    fn num_cells(&self) -> u32;

    fn cell_description(&self, gid: CellGid) -> CellDescription;

    fn cell_kind(&self, gid: CellGid) -> CellKind;

    fn connections_on(&self, _gid: CellGid) -> Vec<CellConnection> {
        Vec::new()
    }

    fn gap_junctions_on(&self, _gid: CellGid) -> Vec<GapJunctionConn> {
        Vec::new()
    }

    fn event_generators(&self, _gid: CellGid) -> Vec<EventGenerator> {
        Vec::new()
    }

    fn probes(&self, _gid: CellGid) -> Vec<ProbeAddress> {
        Vec::new()
    }

    fn global_properties(&self) -> cable_cell::GlobalProperties;
}
