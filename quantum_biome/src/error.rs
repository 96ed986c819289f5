//! Error types for the biome substrate

use crate::validator::InvariantReport;
use thiserror::Error;

/// Result alias used by the biome-level API
pub type BiomeResult<T> = Result<T, BiomeError>;

/// Problems in faction data or channel construction, caught before a biome goes live
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("faction '{faction}' references {emoji}, which is outside its signature")]
    OutsideSignature { faction: String, emoji: String },

    #[error("faction '{0}' has an empty signature")]
    EmptySignature(String),

    #[error("negative Lindblad rate {rate} on {from} -> {to}")]
    NegativeRate { from: String, to: String, rate: f64 },

    #[error("non-finite value in {0}")]
    NonFinite(String),

    #[error("gate threshold {0} outside [0, 1)")]
    InvalidThreshold(f64),

    #[error("channel {0} -> {0} has identical source and target")]
    SelfTransition(String),

    #[error("icon {0} is not adaptive and cannot be retuned")]
    NotAdaptive(String),

    #[error("unknown icon {0}")]
    UnknownIcon(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Register capacity and binding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("cannot register {emoji}: register is full ({cap} qubits)")]
    CapacityExceeded { emoji: String, cap: usize },

    #[error("qubit cap {requested} exceeds the hard limit of {limit}")]
    CapAboveHardLimit { requested: usize, limit: usize },

    #[error("qubit cap must be at least one")]
    ZeroCap,

    #[error("{emoji} is already bound to qubit {qubit}")]
    AlreadyBound { emoji: String, qubit: usize },

    #[error("axis poles must differ, got {0} twice")]
    DegenerateAxis(String),
}

/// Failures of an evolution call. Numerical drift is never reported here; it is corrected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvolveError {
    #[error("{what} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid timestep {0}")]
    InvalidTimestep(f64),

    #[error("state invariants violated: {0}")]
    InvariantViolation(InvariantReport),
}

/// Failures of the measurement protocol
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasurementError {
    #[error("qubit {qubit} out of range for a {num_qubits}-qubit register")]
    QubitOutOfRange { qubit: usize, num_qubits: usize },

    #[error("selected branch has zero probability")]
    ZeroProbability,
}

/// Rejected player actions. The engine state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("unknown biome {0}")]
    UnknownBiome(usize),

    #[error("biome {biome} has no plot at position {position}")]
    UnknownPosition { biome: usize, position: usize },

    #[error("no plot at position {0}")]
    NoSuchPlot(usize),

    #[error("emoji {0} is not registered in this biome")]
    UnknownEmoji(String),

    #[error("qubit {0} is not part of the register")]
    UnknownQubit(usize),

    #[error("plot {0} is already planted")]
    AlreadyPlanted(usize),

    #[error("plot {0} has nothing planted")]
    NotPlanted(usize),

    #[error("plot {0} was already measured")]
    AlreadyMeasured(usize),

    #[error("plot {0} has not been measured yet")]
    NotMeasured(usize),

    #[error("cannot entangle plot {0} with itself")]
    SamePosition(usize),
}

impl ActionError {
    /// Attach the biome id to a position error raised inside a biome
    pub fn in_biome(self, biome: usize) -> Self {
        match self {
            ActionError::NoSuchPlot(position) => ActionError::UnknownPosition { biome, position },
            other => other,
        }
    }
}

/// Top-level error for the substrate
#[derive(Debug, Error)]
pub enum BiomeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    #[error("evolution error: {0}")]
    Evolve(#[from] EvolveError),

    #[error("measurement error: {0}")]
    Measurement(#[from] MeasurementError),

    #[error("action rejected: {0}")]
    Action(#[from] ActionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
