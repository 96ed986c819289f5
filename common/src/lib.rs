//! Common utilities for the quantum biome workspace
//!
//! This crate provides logging setup and the numeric tolerances shared by the
//! substrate and the layout engine.

pub mod logging;

pub use logging::init_logging;

/// Numeric tolerances used across simulations
pub mod constants {
    /// Largest accepted deviation of Tr(ρ) from 1 after a step
    pub const TRACE_TOLERANCE: f64 = 1e-6;

    /// Largest accepted max|ρ - ρ†| entry
    pub const HERMITICITY_TOLERANCE: f64 = 1e-6;

    /// Most negative eigenvalue accepted before a state counts as unphysical
    pub const EIGENVALUE_FLOOR: f64 = -1e-6;

    /// Probabilities below this are treated as zero
    pub const PROBABILITY_EPSILON: f64 = 1e-12;

    /// Hard ceiling on register size: 2^16 amplitudes per side
    pub const HARD_QUBIT_CAP: usize = 16;
}
