//! Substrate configuration
//!
//! Everything here is a plain value handed to constructors. Nothing reads
//! global state, so differently configured farms can live side by side.

use crate::error::{BiomeResult, ConfigError};
use crate::observables::EntropyMode;
use common::constants::HARD_QUBIT_CAP;
use force_graph::ForceParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a measurement outcome is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutMode {
    /// Sample from the Born distribution
    #[default]
    #[serde(alias = "HARDWARE")]
    Hardware,
    /// Report the distribution and take the most probable outcome
    #[serde(alias = "INSPECTOR")]
    Inspector,
}

/// How strongly a measurement disturbs ρ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackactionMode {
    /// Partial collapse mixed with the pre-measurement state
    #[default]
    #[serde(alias = "KID_LIGHT")]
    KidLight,
    /// Full projective collapse
    #[serde(alias = "LAB_TRUE")]
    LabTrue,
}

/// What happens to the branch that was not observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectiveMeasureModel {
    /// Keep the observed branch, pay 1/p for it
    #[default]
    #[serde(alias = "POSTSELECT_COSTED")]
    PostselectCosted,
    /// Imperfect detector with click / no-click outcomes
    #[serde(alias = "CLICK_NOCLICK")]
    ClickNoClick,
}

/// Physical rigor of measurement and debug checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigorConfig {
    pub readout: ReadoutMode,
    pub backaction: BackactionMode,
    pub selective: SelectiveMeasureModel,
    /// Wrap the evolver in the invariant validator
    pub enable_invariant_checks: bool,
}

impl RigorConfig {
    /// Strict lab settings: sampled readout, full collapse, validator on
    pub fn lab() -> Self {
        Self {
            readout: ReadoutMode::Hardware,
            backaction: BackactionMode::LabTrue,
            selective: SelectiveMeasureModel::PostselectCosted,
            enable_invariant_checks: true,
        }
    }
}

/// Integrator settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Longest single RK4 substep
    pub max_dt: f64,
    /// Steps precomputed for a static biome, including the current one
    pub lookahead_steps: usize,
    pub entropy_mode: EntropyMode,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_dt: 0.02,
            lookahead_steps: 5,
            entropy_mode: EntropyMode::VonNeumann,
        }
    }
}

/// Measurement instrument parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementTuning {
    /// Mixing weight s of the collapsed state under kid-light backaction
    pub kid_light_strength: f64,
    /// Detector efficiency η for click / no-click
    pub detector_efficiency: f64,
    /// Ceiling on the 1/p postselection yield
    pub postselect_cap: f64,
}

impl Default for MeasurementTuning {
    fn default() -> Self {
        Self {
            kid_light_strength: 0.5,
            detector_efficiency: 0.9,
            postselect_cap: 100.0,
        }
    }
}

/// Complete substrate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    pub rigor: RigorConfig,
    pub evolution: EvolutionConfig,
    pub measurement: MeasurementTuning,
    pub max_qubits: usize,
    pub layout: ForceParams,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            rigor: RigorConfig::default(),
            evolution: EvolutionConfig::default(),
            measurement: MeasurementTuning::default(),
            max_qubits: 12,
            layout: ForceParams::default(),
        }
    }
}

impl SubstrateConfig {
    pub fn from_json(json: &str) -> BiomeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> BiomeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.evolution;
        if !(e.max_dt.is_finite() && e.max_dt > 0.0) {
            return Err(ConfigError::Invalid(format!("max_dt must be positive, got {}", e.max_dt)));
        }
        if e.lookahead_steps == 0 {
            return Err(ConfigError::Invalid("lookahead_steps must be at least 1".into()));
        }

        let m = &self.measurement;
        if !(m.kid_light_strength > 0.0 && m.kid_light_strength < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "kid_light_strength must lie in (0, 1), got {}",
                m.kid_light_strength
            )));
        }
        if !(m.detector_efficiency > 0.0 && m.detector_efficiency <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "detector_efficiency must lie in (0, 1], got {}",
                m.detector_efficiency
            )));
        }
        if !(m.postselect_cap >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "postselect_cap must be at least 1, got {}",
                m.postselect_cap
            )));
        }

        if self.max_qubits == 0 || self.max_qubits > HARD_QUBIT_CAP {
            return Err(ConfigError::Invalid(format!(
                "max_qubits must lie in 1..={HARD_QUBIT_CAP}, got {}",
                self.max_qubits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SubstrateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_qubits, 12);
        assert_eq!(config.evolution.lookahead_steps, 5);
        assert_eq!(config.measurement.kid_light_strength, 0.5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SubstrateConfig::from_json(
            r#"{"rigor": {"readout": "INSPECTOR", "backaction": "lab_true"}, "max_qubits": 8}"#,
        )
        .unwrap();
        assert_eq!(config.rigor.readout, ReadoutMode::Inspector);
        assert_eq!(config.rigor.backaction, BackactionMode::LabTrue);
        assert_eq!(config.rigor.selective, SelectiveMeasureModel::PostselectCosted);
        assert_eq!(config.max_qubits, 8);
        assert_eq!(config.evolution.max_dt, 0.02);
    }

    #[test]
    fn test_cap_above_hard_limit_rejected() {
        let result = SubstrateConfig::from_json(r#"{"max_qubits": 17}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_kid_light_strength_bounds() {
        let mut config = SubstrateConfig::default();
        config.measurement.kid_light_strength = 1.0;
        assert!(config.validate().is_err());
    }
}
