//! Quantum Biome Substrate
//!
//! An open-quantum-system simulator behind a farming game. Each biome keeps a
//! density matrix over a register of qubits whose poles are bound to emojis:
//!
//! - **Factions & Icons**: JSON-configured couplings merged per emoji
//! - **Dynamics**: Hamiltonian and (gated) Lindblad channels compiled to sparse operators
//! - **Evolution**: RK4 integration of the Lindblad master equation
//! - **Measurement**: Born-rule readout with configurable rigor
//! - **Lookahead**: cached future frames for biomes whose dynamics are static
//! - **Observables**: purity, entropy, Bloch vectors and pairwise correlations
//! - **Farm**: frame loop with queued player actions and a force-directed layout

pub mod biome;
pub mod config;
pub mod density;
pub mod entanglement;
pub mod error;
pub mod evolver;
pub mod faction;
pub mod farm;
pub mod hamiltonian;
pub mod icon;
pub mod lindblad;
pub mod lookahead;
pub mod measurement;
pub mod observables;
pub mod operator;
pub mod register;
pub mod validator;

pub use biome::{Biome, BiomeBuilder, BiomeSnapshot, Plot, PlotState};
pub use config::{BackactionMode, ReadoutMode, RigorConfig, SelectiveMeasureModel, SubstrateConfig};
pub use density::DensityMatrix;
pub use entanglement::BellState;
pub use error::{ActionError, BiomeError, BiomeResult, ConfigError, EvolveError, MeasurementError};
pub use evolver::{build_evolver, Evolve, Rk4Evolver};
pub use faction::{load_factions, Faction};
pub use farm::{Action, Farm, FarmEvent, FrameReport};
pub use icon::{merge_factions, Icon, IconSet};
pub use measurement::{MeasurementProtocol, MeasurementResult};
pub use observables::{EntropyMode, ObservableSnapshot};
pub use register::{Pole, RegisterMap};
