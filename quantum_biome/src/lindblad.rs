//! Dissipative channels of a biome
//!
//!   D[L](ρ) = L ρ L† − ½{L†L, ρ}
//!
//! Each channel moves population from a source mode to a target mode. Within
//! one qubit that is the transition |b_t⟩⟨b_s|. Across qubits the source qubit
//! leaves its source pole while the target qubit lands on its target pole:
//!
//!   L = (|b_t⟩⟨¬b_t|)_target ⊗ (|¬b_s⟩⟨b_s|)_source
//!
//! A gated channel additionally scales its rate by the population of a third
//! mode, evaluated once per integration substep.

use crate::density::diagonal_population;
use crate::error::ConfigError;
use crate::faction::validate_rate;
use crate::icon::IconSet;
use crate::operator::{transition, SparseOperator, C64};
use crate::register::{Mode, RegisterMap};
use nalgebra::{Complex, DMatrix};

/// Population-dependent rate multiplier
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub emoji: String,
    pub mode: Mode,
    pub threshold: f64,
    pub inverse: bool,
}

impl Gate {
    /// g(p) = 0 below the threshold, rising linearly to 1 at p = 1.
    /// An inverse gate evaluates 1 − p instead.
    pub fn factor(&self, population: f64) -> f64 {
        let p = if self.inverse {
            1.0 - population
        } else {
            population
        }
        .clamp(0.0, 1.0);

        if p < self.threshold {
            0.0
        } else {
            ((p - self.threshold) / (1.0 - self.threshold)).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LindbladChannel {
    pub source: String,
    pub target: String,
    pub source_mode: Mode,
    pub target_mode: Mode,
    pub rate: f64,
    pub gate: Option<Gate>,
}

impl LindbladChannel {
    pub fn new(
        source: (&str, Mode),
        target: (&str, Mode),
        rate: f64,
        gate: Option<Gate>,
    ) -> Result<Self, ConfigError> {
        validate_rate(source.0, target.0, rate)?;
        if source.1 == target.1 {
            return Err(ConfigError::SelfTransition(source.0.to_string()));
        }
        if let Some(g) = &gate {
            if !(0.0..1.0).contains(&g.threshold) {
                return Err(ConfigError::InvalidThreshold(g.threshold));
            }
        }
        Ok(Self {
            source: source.0.to_string(),
            target: target.0.to_string(),
            source_mode: source.1,
            target_mode: target.1,
            rate,
            gate,
        })
    }

    /// Unit-rate jump operator on an `num_qubits` register
    pub fn jump_operator(&self, num_qubits: usize) -> SparseOperator {
        let (s, t) = (self.source_mode, self.target_mode);
        let bs = s.pole.bit();
        let bt = t.pole.bit();

        if s.qubit == t.qubit {
            SparseOperator::single_qubit(num_qubits, s.qubit, &transition(bs, bt))
        } else {
            SparseOperator::two_qubit(
                num_qubits,
                t.qubit,
                &transition(1 - bt, bt),
                s.qubit,
                &transition(bs, 1 - bs),
            )
        }
    }
}

/// Resolve every merged transition and gated channel against the register.
///
/// Transitions touching unregistered emojis are skipped. Channels leaving an
/// eternal icon are dropped.
pub fn build_channels(
    icons: &IconSet,
    register: &RegisterMap,
) -> Result<Vec<LindbladChannel>, ConfigError> {
    let eternal = |emoji: &str| icons.get(emoji).is_some_and(|icon| icon.is_eternal);
    let mut channels = Vec::new();

    for (source, target, rate) in icons.transitions() {
        if rate == 0.0 {
            continue;
        }
        if eternal(&source) {
            log::warn!("dropping channel {source} -> {target}: {source} is eternal");
            continue;
        }
        match (register.mode(&source), register.mode(&target)) {
            (Some(sm), Some(tm)) => {
                channels.push(LindbladChannel::new((&source, sm), (&target, tm), rate, None)?)
            }
            _ => log::debug!("skipping channel {source} -> {target}: emoji not in register"),
        }
    }

    for icon in icons.iter() {
        for gated in &icon.gated {
            if gated.rate == 0.0 {
                continue;
            }
            if icon.is_eternal {
                log::warn!(
                    "dropping gated channel {} -> {}: {} is eternal",
                    gated.source,
                    gated.target,
                    gated.source
                );
                continue;
            }
            let modes = (
                register.mode(&gated.source),
                register.mode(&gated.target),
                register.mode(&gated.gate),
            );
            let (Some(sm), Some(tm), Some(gm)) = modes else {
                log::debug!(
                    "skipping gated channel {} -> {}: emoji not in register",
                    gated.source,
                    gated.target
                );
                continue;
            };
            let gate = Gate {
                emoji: gated.gate.clone(),
                mode: gm,
                threshold: gated.threshold,
                inverse: gated.inverse,
            };
            channels.push(LindbladChannel::new(
                (&gated.source, sm),
                (&gated.target, tm),
                gated.rate,
                Some(gate),
            )?);
        }
    }

    Ok(channels)
}

/// A channel with L, L† and L†L precomputed
#[derive(Debug, Clone, PartialEq)]
struct CompiledChannel {
    channel: LindbladChannel,
    jump: SparseOperator,
    jump_dag_jump: SparseOperator,
}

/// All channels of one biome, compiled for a fixed register size
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {
    dim: usize,
    compiled: Vec<CompiledChannel>,
}

impl ChannelSet {
    pub fn empty(num_qubits: usize) -> Self {
        Self {
            dim: 1 << num_qubits,
            compiled: Vec::new(),
        }
    }

    pub fn compile(channels: Vec<LindbladChannel>, num_qubits: usize) -> Self {
        let compiled: Vec<CompiledChannel> = channels
            .into_iter()
            .map(|channel| {
                let jump = channel.jump_operator(num_qubits);
                let jump_dag_jump = jump.adjoint().mul(&jump);
                CompiledChannel {
                    channel,
                    jump,
                    jump_dag_jump,
                }
            })
            .collect();

        log::debug!(
            "compiled {} channels, {} gated",
            compiled.len(),
            compiled.iter().filter(|c| c.channel.gate.is_some()).count()
        );
        Self {
            dim: 1 << num_qubits,
            compiled,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = &LindbladChannel> {
        self.compiled.iter().map(|c| &c.channel)
    }

    /// Rate × gate factor for each channel, gates read from `rho`
    pub fn effective_rates(&self, rho: &DMatrix<C64>) -> Vec<f64> {
        self.compiled
            .iter()
            .map(|c| match &c.channel.gate {
                Some(gate) => {
                    let p = diagonal_population(rho, gate.mode.qubit, gate.mode.pole.bit());
                    c.channel.rate * gate.factor(p)
                }
                None => c.channel.rate,
            })
            .collect()
    }

    /// Accumulate Σ γ_k D[L_k](ρ) into `out`
    pub fn accumulate_dissipator(&self, rho: &DMatrix<C64>, rates: &[f64], out: &mut DMatrix<C64>) {
        for (c, &gamma) in self.compiled.iter().zip(rates) {
            if gamma <= 0.0 {
                continue;
            }
            let half = Complex::new(-0.5 * gamma, 0.0);
            c.jump.sandwich_into(rho, gamma, out);
            c.jump_dag_jump.left_mul_into(rho, half, out);
            c.jump_dag_jump.right_mul_into(rho, half, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityMatrix;
    use crate::faction::{Faction, GatedChannel};
    use crate::icon::merge_factions;
    use crate::operator::ZERO;
    use crate::register::Pole;

    fn north(qubit: usize) -> Mode {
        Mode {
            qubit,
            pole: Pole::North,
        }
    }

    #[test]
    fn test_gate_factor_shape() {
        let gate = Gate {
            emoji: "💧".into(),
            mode: north(0),
            threshold: 0.2,
            inverse: false,
        };
        assert_eq!(gate.factor(0.1), 0.0);
        assert_eq!(gate.factor(0.2), 0.0);
        assert!((gate.factor(0.6) - 0.5).abs() < 1e-12);
        assert!((gate.factor(1.0) - 1.0).abs() < 1e-12);

        let inverse = Gate { inverse: true, ..gate };
        assert!((inverse.factor(0.0) - 1.0).abs() < 1e-12);
        assert_eq!(inverse.factor(0.9), 0.0);
    }

    #[test]
    fn test_negative_rate_rejected() {
        let result = LindbladChannel::new(("🌾", north(0)), ("🍂", north(1)), -0.1, None);
        assert!(matches!(result, Err(ConfigError::NegativeRate { .. })));
    }

    #[test]
    fn test_cross_qubit_jump_moves_population() {
        let channel = LindbladChannel::new(("🌾", north(0)), ("🍂", north(1)), 1.0, None).unwrap();
        let l = channel.jump_operator(2).to_dense();
        // 🌾 on (q0 north) with 🍂 off (q1 south) → 🌾 off, 🍂 on: |10⟩ (idx 2) → |01⟩ (idx 1)
        assert_eq!(l[(1, 2)].re, 1.0);
        assert_eq!(channel.jump_operator(2).nnz(), 1);
    }

    #[test]
    fn test_dissipator_is_traceless_and_drains_source() {
        let mut register = RegisterMap::new(2).unwrap();
        register.assign_axis("🌾", "🍂").unwrap();
        let icons =
            merge_factions(&[Faction::new("Rot", &["🌾", "🍂"]).with_lindblad("🌾", "🍂", 0.5)])
                .unwrap();
        let set = ChannelSet::compile(build_channels(&icons, &register).unwrap(), 1);

        let rho = DensityMatrix::ground(1);
        let rates = set.effective_rates(rho.matrix());
        let mut out = DMatrix::from_element(2, 2, ZERO);
        set.accumulate_dissipator(rho.matrix(), &rates, &mut out);

        assert!((out[(0, 0)].re + 0.5).abs() < 1e-12);
        assert!((out[(1, 1)].re - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gated_rate_follows_gate_population() {
        let mut register = RegisterMap::new(2).unwrap();
        register.assign_axis("🌾", "🍂").unwrap();
        register.assign("💧").unwrap();
        let icons = merge_factions(&[Faction::new("Rot", &["🌾", "🍂", "💧"]).with_gated(
            GatedChannel {
                source: "🌾".into(),
                target: "🍂".into(),
                gate: "💧".into(),
                rate: 0.4,
                threshold: 0.0,
                inverse: false,
            },
        )])
        .unwrap();
        let set = ChannelSet::compile(build_channels(&icons, &register).unwrap(), 2);

        // 💧 qubit north → gate open
        let rho = DensityMatrix::ground(2);
        assert!((set.effective_rates(rho.matrix())[0] - 0.4).abs() < 1e-12);

        // 💧 qubit on its vacuum pole → gate closed
        let one = nalgebra::Complex::new(1.0, 0.0);
        let off = DensityMatrix::product(&[[one, ZERO], [ZERO, one]]);
        assert_eq!(set.effective_rates(off.matrix())[0], 0.0);
    }

    #[test]
    fn test_eternal_source_dropped() {
        let mut register = RegisterMap::new(2).unwrap();
        register.assign("💎").unwrap();
        register.assign("🪨").unwrap();
        let icons = merge_factions(&[Faction::new("Stone", &["💎", "🪨"])
            .with_lindblad("💎", "🪨", 0.1)
            .with_eternal("💎")])
        .unwrap();
        assert!(build_channels(&icons, &register).unwrap().is_empty());
    }
}
