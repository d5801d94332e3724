#![forbid(unsafe_code)]

//! Finite-volume discretization and mechanism-data layout for cable cells:
//! CV geometry, the per-CV electrical quantities, voltage interpolants and
//! the translation of painted/placed mechanisms into per-CV parameter
//! arrays, ion configurations, stimulus tables and gap-junction columns.

mod discretization;
mod gapjunction;
mod geometry;
mod interpolant;
mod mechdata;

pub use discretization::{discretize, discretize_cell, CvDiscretization};
pub use gapjunction::{
    gap_junction_cv_map, resolve_gap_junctions, FvmGapJunction, GapJunctionConn, GjCvMapEntry,
};
pub use geometry::{CvGeometry, CvPrefer};
pub use interpolant::{axial_current, interpolate_voltage, VoltageInterpolant};
pub use mechdata::{
    build_mechanism_data, build_mechanism_data_all, IonConfig, MechanismConfig, MechanismData,
    StimulusConfig,
};

use cable_mech::MechanismError;
use cable_morph::{MorphologyError, PwElement, PwOverCable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Morphology(#[from] MorphologyError),
    #[error(transparent)]
    Mechanism(#[from] MechanismError),
    #[error("incomplete global properties: {0} is unset")]
    IncompleteGlobalProperties(&'static str),
    #[error("mechanism {mech} uses ion {ion} which is missing in global properties")]
    UnknownIon { mech: String, ion: String },
    #[error("mechanism {mech} uses ion {ion} expecting valence {expected}, species has {got}")]
    ValenceMismatch {
        mech: String,
        ion: String,
        expected: i32,
        got: i32,
    },
    #[error("overlapping ion concentration writing mechanism {mech} on ion {ion}")]
    OverlappingIonWriter { mech: String, ion: String },
    #[error("expected {expected} mechanism, got {mech} which is {got}")]
    WrongMechanismKind {
        mech: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("mechanism {mech} writes both reversal potential and concentration of ion {ion}")]
    RevpotAndConcentration { mech: String, ion: String },
    #[error("inconsistent reversal potential ion assignment for mechanism {0}")]
    RevpotInconsistent(String),
    #[error("reversal potential mechanism {mech} for ion {ion} does not write it")]
    RevpotDoesNotWrite { mech: String, ion: String },
    #[error("reversal potential mechanism {mech} also writes ion {ion} which has no method")]
    RevpotUnspecifiedWrite { mech: String, ion: String },
    #[error("gap junction ({gid}, {lid}) cannot be resolved on this domain")]
    BadGapJunction { gid: u32, lid: u32 },
}

/// Restrict a piecewise-constant function to `[lo, hi]`.
pub(crate) fn clip_pw(pw: &PwOverCable, lo: f64, hi: f64) -> PwOverCable {
    pw.iter()
        .filter(|piece| piece.hi > lo && piece.lo < hi)
        .map(|piece| PwElement {
            lo: piece.lo.max(lo),
            hi: piece.hi.min(hi),
            value: piece.value,
        })
        .collect()
}
