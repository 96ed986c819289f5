//! Factions: reusable coupling bundles over a handful of signature emojis
//!
//! A faction only ever talks about its own signature. Biomes are composed by
//! stacking several factions; the per-emoji merge lives in [`crate::icon`].

use crate::error::{BiomeResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Emoji-keyed map of emoji-keyed coefficients, e.g. `hamiltonian["🌾"]["☀"] = 0.3`
pub type CouplingTable = BTreeMap<String, BTreeMap<String, f64>>;

/// Lindblad transition that only fires while a third mode is populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatedChannel {
    pub source: String,
    pub target: String,
    pub gate: String,
    pub rate: f64,
    /// Gate population below which the channel is silent
    #[serde(default)]
    pub threshold: f64,
    /// Fire on the gate's absence instead of its presence
    #[serde(default)]
    pub inverse: bool,
}

/// Periodic drive `amplitude · cos(frequency · t + phase)` on one emoji's qubit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub amplitude: f64,
    pub frequency: f64,
    #[serde(default)]
    pub phase: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Faction {
    pub name: String,
    pub signature: Vec<String>,
    #[serde(default)]
    pub self_energies: BTreeMap<String, f64>,
    #[serde(default)]
    pub hamiltonian: CouplingTable,
    /// `lindblad_outgoing[source][target] = rate`
    #[serde(default)]
    pub lindblad_outgoing: CouplingTable,
    /// `lindblad_incoming[target][source] = rate`
    #[serde(default)]
    pub lindblad_incoming: CouplingTable,
    #[serde(default)]
    pub gated_lindblad: Vec<GatedChannel>,
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverSpec>,
    #[serde(default)]
    pub adaptive: Vec<String>,
    #[serde(default)]
    pub eternal: Vec<String>,
}

impl Faction {
    pub fn new(name: &str, signature: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_self_energy(mut self, emoji: &str, energy: f64) -> Self {
        self.self_energies.insert(emoji.to_string(), energy);
        self
    }

    pub fn with_coupling(mut self, a: &str, b: &str, strength: f64) -> Self {
        self.hamiltonian
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), strength);
        self
    }

    pub fn with_lindblad(mut self, source: &str, target: &str, rate: f64) -> Self {
        self.lindblad_outgoing
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string(), rate);
        self
    }

    pub fn with_incoming(mut self, target: &str, source: &str, rate: f64) -> Self {
        self.lindblad_incoming
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string(), rate);
        self
    }

    pub fn with_gated(mut self, channel: GatedChannel) -> Self {
        self.gated_lindblad.push(channel);
        self
    }

    pub fn with_driver(mut self, emoji: &str, driver: DriverSpec) -> Self {
        self.drivers.insert(emoji.to_string(), driver);
        self
    }

    pub fn with_adaptive(mut self, emoji: &str) -> Self {
        self.adaptive.push(emoji.to_string());
        self
    }

    pub fn with_eternal(mut self, emoji: &str) -> Self {
        self.eternal.push(emoji.to_string());
        self
    }

    pub fn in_signature(&self, emoji: &str) -> bool {
        self.signature.iter().any(|s| s == emoji)
    }

    /// Check that every term stays inside the signature and every number is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signature.is_empty() {
            return Err(ConfigError::EmptySignature(self.name.clone()));
        }

        let check = |emoji: &str| -> Result<(), ConfigError> {
            if self.in_signature(emoji) {
                Ok(())
            } else {
                Err(ConfigError::OutsideSignature {
                    faction: self.name.clone(),
                    emoji: emoji.to_string(),
                })
            }
        };
        let finite = |value: f64, what: &str| -> Result<(), ConfigError> {
            if value.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::NonFinite(format!("{} of faction '{}'", what, self.name)))
            }
        };

        for (emoji, energy) in &self.self_energies {
            check(emoji)?;
            finite(*energy, "self-energy")?;
        }
        for (a, row) in &self.hamiltonian {
            check(a)?;
            for (b, j) in row {
                check(b)?;
                finite(*j, "coupling")?;
            }
        }
        for (source, row) in &self.lindblad_outgoing {
            check(source)?;
            for (target, rate) in row {
                check(target)?;
                validate_rate(source, target, *rate)?;
            }
        }
        for (target, row) in &self.lindblad_incoming {
            check(target)?;
            for (source, rate) in row {
                check(source)?;
                validate_rate(source, target, *rate)?;
            }
        }
        for gated in &self.gated_lindblad {
            check(&gated.source)?;
            check(&gated.target)?;
            check(&gated.gate)?;
            validate_rate(&gated.source, &gated.target, gated.rate)?;
            if !(0.0..1.0).contains(&gated.threshold) {
                return Err(ConfigError::InvalidThreshold(gated.threshold));
            }
        }
        for (emoji, driver) in &self.drivers {
            check(emoji)?;
            finite(driver.amplitude, "driver amplitude")?;
            finite(driver.frequency, "driver frequency")?;
            finite(driver.phase, "driver phase")?;
        }
        for emoji in self.adaptive.iter().chain(&self.eternal) {
            check(emoji)?;
        }
        Ok(())
    }
}

/// Rates must be finite, non-negative, and move population somewhere else
pub fn validate_rate(source: &str, target: &str, rate: f64) -> Result<(), ConfigError> {
    if !rate.is_finite() {
        return Err(ConfigError::NonFinite(format!("rate {source} -> {target}")));
    }
    if rate < 0.0 {
        return Err(ConfigError::NegativeRate {
            from: source.to_string(),
            to: target.to_string(),
            rate,
        });
    }
    if source == target {
        return Err(ConfigError::SelfTransition(source.to_string()));
    }
    Ok(())
}

/// Parse a JSON array of factions and validate each one
pub fn factions_from_json(json: &str) -> BiomeResult<Vec<Faction>> {
    let factions: Vec<Faction> = serde_json::from_str(json)?;
    for faction in &factions {
        faction.validate()?;
    }
    log::debug!("loaded {} factions", factions.len());
    Ok(factions)
}

pub fn load_factions(path: impl AsRef<Path>) -> BiomeResult<Vec<Faction>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    factions_from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validates() {
        let faction = Faction::new("Millers", &["🌾", "🍂", "☀"])
            .with_self_energy("🌾", 0.4)
            .with_coupling("🌾", "☀", 0.2)
            .with_lindblad("🌾", "🍂", 0.02);
        assert!(faction.validate().is_ok());
    }

    #[test]
    fn test_coupling_outside_signature_rejected() {
        let faction = Faction::new("Millers", &["🌾", "🍂"]).with_coupling("🌾", "🐺", 0.1);
        assert_eq!(
            faction.validate(),
            Err(ConfigError::OutsideSignature {
                faction: "Millers".into(),
                emoji: "🐺".into()
            })
        );
    }

    #[test]
    fn test_negative_rate_rejected() {
        let faction = Faction::new("Rot", &["🌾", "🍂"]).with_lindblad("🌾", "🍂", -0.1);
        assert!(matches!(
            faction.validate(),
            Err(ConfigError::NegativeRate { .. })
        ));
    }

    #[test]
    fn test_gate_threshold_range() {
        let faction = Faction::new("Rot", &["🌾", "🍂", "💧"]).with_gated(GatedChannel {
            source: "🌾".into(),
            target: "🍂".into(),
            gate: "💧".into(),
            rate: 0.1,
            threshold: 1.0,
            inverse: false,
        });
        assert_eq!(faction.validate(), Err(ConfigError::InvalidThreshold(1.0)));
    }

    #[test]
    fn test_json_field_names() {
        let json = r#"[{
            "name": "Granary Guilds",
            "signature": ["🌾", "🍞", "💰"],
            "self_energies": {"🌾": 0.1},
            "hamiltonian": {"🌾": {"🍞": 0.25}},
            "lindblad_outgoing": {"🍞": {"💰": 0.05}},
            "gated_lindblad": [{"source": "🌾", "target": "🍞", "gate": "💰", "rate": 0.01, "threshold": 0.2}],
            "drivers": {"🌾": {"amplitude": 0.3, "frequency": 1.5}}
        }]"#;
        let factions = factions_from_json(json).unwrap();
        assert_eq!(factions.len(), 1);
        assert_eq!(factions[0].hamiltonian["🌾"]["🍞"], 0.25);
        assert!(!factions[0].gated_lindblad[0].inverse);
        assert_eq!(factions[0].drivers["🌾"].phase, 0.0);
    }
}
