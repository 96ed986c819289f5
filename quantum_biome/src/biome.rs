//! A biome: one register, one density matrix, and the plots bound to it
//!
//! The biome owns its icons, register, ρ and compiled dynamics exclusively.
//! Discrete player actions (plant, measure, harvest, entangle) mutate ρ here;
//! continuous evolution is driven from outside through [`Biome::advance`].

use crate::density::DensityMatrix;
use crate::entanglement::{entangle, BellState, EntanglementLink};
use crate::error::{ActionError, BiomeResult, ConfigError};
use crate::faction::Faction;
use crate::hamiltonian::{Hamiltonian, HamiltonianBuilder};
use crate::icon::{merge_factions, IconSet, IconTuning};
use crate::lindblad::{build_channels, ChannelSet};
use crate::measurement::{MeasurementProtocol, MeasurementResult};
use crate::observables::{EntropyMode, ObservableSnapshot};
use crate::operator::{C64, ONE, ZERO};
use crate::register::{Mode, Pole, QubitAxis, RegisterMap};
use common::constants::EIGENVALUE_FLOOR;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PlotState {
    #[default]
    Empty,
    Planted,
    Measured { outcome: Pole, yield_modifier: f64 },
}

/// A farm position bound to one emoji's qubit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub position: usize,
    pub emoji: String,
    pub qubit: usize,
    pub state: PlotState,
}

/// Outcome of a measurement on a plot
#[derive(Debug, Clone, PartialEq)]
pub struct PlotMeasurement {
    pub position: usize,
    /// Emoji on the observed pole; `None` for a vacuum pole
    pub outcome_emoji: Option<String>,
    pub result: MeasurementResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    pub position: usize,
    pub emoji: Option<String>,
    pub outcome: Pole,
    pub yield_modifier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeEntry {
    pub emoji: String,
    pub qubit: usize,
    pub pole: Pole,
}

/// Persisted biome state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomeSnapshot {
    pub name: String,
    pub modes: Vec<ModeEntry>,
    pub num_qubits: usize,
    /// Row-major interleaved `[re, im, …]`
    pub rho: Vec<f64>,
    pub time: f64,
    pub tick: u64,
    #[serde(default)]
    pub plots: Vec<Plot>,
    #[serde(default)]
    pub links: Vec<EntanglementLink>,
}

impl BiomeSnapshot {
    pub fn to_json(&self) -> BiomeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> BiomeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuild the register axes from the mode table
    fn axes(&self) -> Result<Vec<QubitAxis>, ConfigError> {
        let mut axes: Vec<(Option<String>, Option<String>)> = vec![(None, None); self.num_qubits];
        for entry in &self.modes {
            let slot = axes.get_mut(entry.qubit).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "snapshot binds {} to qubit {} of {}",
                    entry.emoji, entry.qubit, self.num_qubits
                ))
            })?;
            match entry.pole {
                Pole::North => slot.0 = Some(entry.emoji.clone()),
                Pole::South => slot.1 = Some(entry.emoji.clone()),
            }
        }
        axes.into_iter()
            .enumerate()
            .map(|(q, (north, south))| match north {
                Some(north) => Ok(QubitAxis { north, south }),
                None => Err(ConfigError::Invalid(format!("qubit {q} has no north emoji"))),
            })
            .collect()
    }
}

pub struct BiomeBuilder {
    name: String,
    factions: Vec<Faction>,
    axes: Vec<(String, Option<String>)>,
    plots: Vec<String>,
    max_qubits: usize,
    entropy_mode: EntropyMode,
}

impl BiomeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            factions: Vec::new(),
            axes: Vec::new(),
            plots: Vec::new(),
            max_qubits: 12,
            entropy_mode: EntropyMode::default(),
        }
    }

    pub fn faction(mut self, faction: Faction) -> Self {
        self.factions.push(faction);
        self
    }

    pub fn factions(mut self, factions: impl IntoIterator<Item = Faction>) -> Self {
        self.factions.extend(factions);
        self
    }

    /// A lone emoji on the north pole of its own qubit
    pub fn emoji(mut self, emoji: &str) -> Self {
        self.axes.push((emoji.to_string(), None));
        self
    }

    /// Two emojis sharing one qubit
    pub fn axis(mut self, north: &str, south: &str) -> Self {
        self.axes.push((north.to_string(), Some(south.to_string())));
        self
    }

    /// Next plot position, bound to `emoji`
    pub fn plot(mut self, emoji: &str) -> Self {
        self.plots.push(emoji.to_string());
        self
    }

    pub fn max_qubits(mut self, cap: usize) -> Self {
        self.max_qubits = cap;
        self
    }

    pub fn entropy_mode(mut self, mode: EntropyMode) -> Self {
        self.entropy_mode = mode;
        self
    }

    pub fn build(self) -> BiomeResult<Biome> {
        let icons = merge_factions(&self.factions)?;
        let mut register = RegisterMap::new(self.max_qubits)?;
        for (north, south) in &self.axes {
            match south {
                Some(south) => register.assign_axis(north, south)?,
                None => register.assign(north)?,
            };
        }

        let mut plots = Vec::with_capacity(self.plots.len());
        for (position, emoji) in self.plots.into_iter().enumerate() {
            let qubit = register.assign(&emoji)?;
            plots.push(Plot {
                position,
                emoji,
                qubit,
                state: PlotState::Empty,
            });
        }

        let n = register.qubit_count();
        let mut biome = Biome {
            name: self.name,
            icons,
            rho: DensityMatrix::ground(n),
            hamiltonian: Hamiltonian::zero(n),
            channels: ChannelSet::empty(n),
            register,
            plots,
            links: Vec::new(),
            time: 0.0,
            tick: 0,
            composition_version: 0,
            entropy_mode: self.entropy_mode,
        };
        biome.rebuild_dynamics()?;

        log::info!(
            "biome '{}' ready: {} icons, {} qubits, {} plots, {} channels",
            biome.name,
            biome.icons.len(),
            n,
            biome.plots.len(),
            biome.channels.len()
        );
        Ok(biome)
    }
}

#[derive(Debug, Clone)]
pub struct Biome {
    name: String,
    icons: IconSet,
    register: RegisterMap,
    rho: DensityMatrix,
    hamiltonian: Hamiltonian,
    channels: ChannelSet,
    plots: Vec<Plot>,
    links: Vec<EntanglementLink>,
    time: f64,
    tick: u64,
    composition_version: u64,
    entropy_mode: EntropyMode,
}

impl Biome {
    pub fn builder(name: &str) -> BiomeBuilder {
        BiomeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn icons(&self) -> &IconSet {
        &self.icons
    }

    pub fn register(&self) -> &RegisterMap {
        &self.register
    }

    pub fn rho(&self) -> &DensityMatrix {
        &self.rho
    }

    pub fn hamiltonian(&self) -> &Hamiltonian {
        &self.hamiltonian
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn plots(&self) -> &[Plot] {
        &self.plots
    }

    pub fn links(&self) -> &[EntanglementLink] {
        &self.links
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Bumped whenever the register or the icons change
    pub fn composition_version(&self) -> u64 {
        self.composition_version
    }

    /// A static biome's dynamics never change between actions
    pub fn is_static(&self) -> bool {
        !self.icons.has_adaptive()
    }

    pub fn entropy_mode(&self) -> EntropyMode {
        self.entropy_mode
    }

    /// Accept one evolved frame
    pub(crate) fn advance(&mut self, rho: DensityMatrix, dt: f64) {
        self.rho = rho;
        self.time += dt;
        self.tick += 1;
    }

    fn rebuild_dynamics(&mut self) -> Result<(), ConfigError> {
        let n = self.register.qubit_count();
        self.hamiltonian = HamiltonianBuilder::new(&self.register).build(&self.icons);
        self.channels = ChannelSet::compile(build_channels(&self.icons, &self.register)?, n);
        self.composition_version += 1;
        Ok(())
    }

    /// Add an emoji to the register, extending ρ with a north-pole qubit.
    /// Returns the emoji's qubit; already-registered emojis are left alone.
    pub fn register_emoji(&mut self, emoji: &str) -> BiomeResult<usize> {
        if let Some(mode) = self.register.mode(emoji) {
            return Ok(mode.qubit);
        }
        let qubit = self.register.assign(emoji)?;
        self.rho.extend_with_ground();
        self.rebuild_dynamics()?;
        log::info!("biome '{}': registered {emoji} on qubit {qubit}", self.name);
        Ok(qubit)
    }

    /// Change an adaptive icon's couplings at runtime
    pub fn retune_icon(&mut self, emoji: &str, tuning: &IconTuning) -> BiomeResult<()> {
        let icon = self
            .icons
            .get_mut(emoji)
            .ok_or_else(|| ConfigError::UnknownIcon(emoji.to_string()))?;
        if !icon.is_adaptive {
            return Err(ConfigError::NotAdaptive(emoji.to_string()).into());
        }
        icon.apply_tuning(tuning)?;
        self.rebuild_dynamics()?;
        log::debug!("biome '{}': retuned {emoji}", self.name);
        Ok(())
    }

    pub fn plot(&self, position: usize) -> Result<&Plot, ActionError> {
        self.plots.get(position).ok_or(ActionError::NoSuchPlot(position))
    }

    fn plot_mut(&mut self, position: usize) -> Result<&mut Plot, ActionError> {
        self.plots
            .get_mut(position)
            .ok_or(ActionError::NoSuchPlot(position))
    }

    /// Reset the plot's qubit to |+⟩
    pub fn plant(&mut self, position: usize) -> Result<(), ActionError> {
        let plot = self.plot_mut(position)?;
        if plot.state != PlotState::Empty {
            return Err(ActionError::AlreadyPlanted(position));
        }
        plot.state = PlotState::Planted;
        let qubit = plot.qubit;

        let h = C64::new(FRAC_1_SQRT_2, 0.0);
        self.rho.replace_qubit(qubit, [h, h]);
        self.drop_links(position);
        log::debug!("biome '{}': planted position {position}", self.name);
        Ok(())
    }

    pub fn measure<R: Rng + ?Sized>(
        &mut self,
        position: usize,
        protocol: &MeasurementProtocol,
        rng: &mut R,
    ) -> BiomeResult<PlotMeasurement> {
        let plot = self.plot(position)?;
        match plot.state {
            PlotState::Empty => return Err(ActionError::NotPlanted(position).into()),
            PlotState::Measured { .. } => return Err(ActionError::AlreadyMeasured(position).into()),
            PlotState::Planted => {}
        }
        let qubit = plot.qubit;

        let result = protocol.measure(&self.rho, qubit, rng)?;
        self.rho = result.state.clone();
        let outcome_emoji = self
            .register
            .emoji_at(qubit, result.outcome)
            .map(str::to_string);

        self.plot_mut(position)?.state = PlotState::Measured {
            outcome: result.outcome,
            yield_modifier: result.yield_modifier,
        };
        Ok(PlotMeasurement {
            position,
            outcome_emoji,
            result,
        })
    }

    /// Collect a measured plot and reset its qubit to the north pole
    pub fn harvest(&mut self, position: usize) -> Result<Harvest, ActionError> {
        let plot = self.plot(position)?;
        let (outcome, yield_modifier) = match plot.state {
            PlotState::Measured {
                outcome,
                yield_modifier,
            } => (outcome, yield_modifier),
            PlotState::Planted => return Err(ActionError::NotMeasured(position)),
            PlotState::Empty => return Err(ActionError::NotPlanted(position)),
        };
        let qubit = plot.qubit;
        let emoji = self.register.emoji_at(qubit, outcome).map(str::to_string);

        self.rho.replace_qubit(qubit, [ONE, ZERO]);
        self.plot_mut(position)?.state = PlotState::Empty;
        self.drop_links(position);

        Ok(Harvest {
            position,
            emoji,
            outcome,
            yield_modifier,
        })
    }

    /// Prepare the qubits of two plots in a Bell state
    pub fn entangle(&mut self, a: usize, b: usize, bell: BellState) -> Result<(), ActionError> {
        if a == b {
            return Err(ActionError::SamePosition(a));
        }
        let qa = self.plot(a)?.qubit;
        let qb = self.plot(b)?.qubit;
        if qa == qb {
            return Err(ActionError::SamePosition(a));
        }

        entangle(&mut self.rho, qa, qb, bell)?;
        self.drop_links(a);
        self.drop_links(b);
        self.links.push(EntanglementLink {
            positions: (a, b),
            qubits: (qa, qb),
            bell,
            tick: self.tick,
        });
        Ok(())
    }

    fn drop_links(&mut self, position: usize) {
        self.links
            .retain(|link| link.positions.0 != position && link.positions.1 != position);
    }

    /// Qubits whose plots have been measured and await harvest
    pub fn measured_qubits(&self) -> impl Iterator<Item = usize> + '_ {
        self.plots
            .iter()
            .filter(|p| matches!(p.state, PlotState::Measured { .. }))
            .map(|p| p.qubit)
    }

    pub fn snapshot(&self) -> ObservableSnapshot {
        ObservableSnapshot::extract(
            &self.rho,
            &self.register,
            &self.hamiltonian,
            &self.channels,
            self.entropy_mode,
            self.tick,
            self.time,
        )
    }

    pub fn save_state(&self) -> BiomeSnapshot {
        BiomeSnapshot {
            name: self.name.clone(),
            modes: self
                .register
                .entries()
                .into_iter()
                .map(|(emoji, Mode { qubit, pole })| ModeEntry { emoji, qubit, pole })
                .collect(),
            num_qubits: self.register.qubit_count(),
            rho: self.rho.to_flat(),
            time: self.time,
            tick: self.tick,
            plots: self.plots.clone(),
            links: self.links.clone(),
        }
    }

    /// Replace register, ρ, plots and clock with a saved state.
    /// On error the biome is left unchanged.
    pub fn restore_state(&mut self, snapshot: &BiomeSnapshot) -> BiomeResult<()> {
        let register = RegisterMap::from_axes(self.register.cap(), snapshot.axes()?)?;
        let mut rho = DensityMatrix::from_flat(&snapshot.rho, snapshot.num_qubits)?;
        if !rho.is_finite() || !(rho.trace() > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "snapshot density matrix is not a state (trace {})",
                rho.trace()
            ))
            .into());
        }
        rho.hermitize();
        rho.renormalize();
        let clamped = rho.project_psd();
        if clamped < EIGENVALUE_FLOOR {
            log::warn!("snapshot for '{}' had eigenvalue {clamped:.3e}; clamped", self.name);
        }
        for plot in &snapshot.plots {
            if plot.qubit >= snapshot.num_qubits {
                return Err(ActionError::UnknownQubit(plot.qubit).into());
            }
        }

        self.register = register;
        self.rho = rho;
        self.plots = snapshot.plots.clone();
        self.links = snapshot.links.clone();
        self.time = snapshot.time;
        self.tick = snapshot.tick;
        self.rebuild_dynamics()?;
        log::info!(
            "biome '{}' restored at tick {} ({} qubits)",
            self.name,
            self.tick,
            snapshot.num_qubits
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackactionMode, MeasurementTuning, ReadoutMode, RigorConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use nalgebra::Normed;

    fn wheat_biome() -> Biome {
        Biome::builder("Wheat Field")
            .faction(
                Faction::new("Growers", &["🌾", "🍂", "☀"])
                    .with_self_energy("🌾", 0.2)
                    .with_coupling("🌾", "☀", 0.1)
                    .with_lindblad("🌾", "🍂", 0.05),
            )
            .axis("🌾", "🍂")
            .emoji("☀")
            .plot("🌾")
            .plot("☀")
            .build()
            .unwrap()
    }

    fn inspector() -> MeasurementProtocol {
        MeasurementProtocol::new(
            RigorConfig {
                readout: ReadoutMode::Inspector,
                backaction: BackactionMode::LabTrue,
                ..Default::default()
            },
            MeasurementTuning::default(),
        )
    }

    #[test]
    fn test_build_assigns_register_and_ground_state() {
        let biome = wheat_biome();
        assert_eq!(biome.register().qubit_count(), 2);
        assert_eq!(biome.rho().dim(), 4);
        assert_eq!(biome.plots()[1].qubit, 1);
        assert_eq!(biome.channels().len(), 1);
        assert!(biome.is_static());
    }

    #[test]
    fn test_plant_measure_harvest_cycle() {
        let mut biome = wheat_biome();
        let mut rng = StdRng::seed_from_u64(11);

        assert_eq!(biome.harvest(0), Err(ActionError::NotPlanted(0)));
        biome.plant(0).unwrap();
        assert!((biome.rho().population(0, 0) - 0.5).abs() < 1e-12);
        assert_eq!(biome.plant(0), Err(ActionError::AlreadyPlanted(0)));

        let measured = biome.measure(0, &inspector(), &mut rng).unwrap();
        assert_eq!(measured.outcome_emoji.as_deref(), Some("🌾"));
        assert!(matches!(
            biome.measure(0, &inspector(), &mut rng),
            Err(crate::error::BiomeError::Action(ActionError::AlreadyMeasured(0)))
        ));

        let harvest = biome.harvest(0).unwrap();
        assert_eq!(harvest.emoji.as_deref(), Some("🌾"));
        assert!((harvest.yield_modifier - 2.0).abs() < 1e-12);
        assert!((biome.rho().population(0, 0) - 1.0).abs() < 1e-12);
        assert_eq!(biome.plots()[0].state, PlotState::Empty);
    }

    #[test]
    fn test_unknown_position_rejected() {
        let mut biome = wheat_biome();
        let before = biome.rho().clone();
        assert_eq!(biome.plant(9), Err(ActionError::NoSuchPlot(9)));
        assert_eq!(biome.rho(), &before);
    }

    #[test]
    fn test_register_emoji_extends_state() {
        let mut biome = wheat_biome();
        biome.plant(1).unwrap();
        let coherence = biome.rho().reduced_qubit(1)[(0, 1)];

        let q = biome.register_emoji("💧").unwrap();
        assert_eq!(q, 2);
        assert_eq!(biome.rho().num_qubits(), 3);
        assert!((biome.rho().reduced_qubit(1)[(0, 1)] - coherence).norm() < 1e-12);
        assert_eq!(biome.register_emoji("💧").unwrap(), 2);
    }

    #[test]
    fn test_retune_requires_adaptive_icon() {
        let mut biome = wheat_biome();
        let tuning = IconTuning {
            self_energy: Some(0.9),
            ..Default::default()
        };
        assert!(biome.retune_icon("🌾", &tuning).is_err());
        assert!(biome.retune_icon("🐺", &tuning).is_err());
    }

    #[test]
    fn test_entangle_records_link() {
        let mut biome = wheat_biome();
        biome.entangle(0, 1, BellState::PhiPlus).unwrap();
        assert_eq!(biome.links().len(), 1);
        assert_eq!(biome.links()[0].qubits, (0, 1));
        assert_eq!(biome.entangle(1, 1, BellState::PhiPlus), Err(ActionError::SamePosition(1)));
    }

    #[test]
    fn test_observable_snapshot_serialized_shape() {
        let mut biome = wheat_biome();
        biome.plant(0).unwrap();
        let json = serde_json::to_value(biome.snapshot()).unwrap();

        assert_eq!(json["num_qubits"], 2);
        assert_eq!(json["dimension"], 4);
        assert!(json["purity"].is_number());
        assert!(json["entropy"].is_number());

        let axis = &json["qubit_axes"][0];
        for key in ["qubit", "north_emoji", "south_emoji", "p_north", "p_south", "coherence_mag", "balance"] {
            assert!(axis.get(key).is_some(), "missing qubit axis key {key}");
        }
        assert_eq!(axis["north_emoji"], "🌾");
        assert_eq!(axis["south_emoji"], "🍂");
        assert!((axis["coherence_mag"].as_f64().unwrap() - 0.5).abs() < 1e-12);
        assert!(axis["balance"].as_f64().unwrap().abs() < 1e-12);

        let coupling = &json["hamiltonian_couplings"][0];
        assert!(coupling["J"].is_number());
        assert!(coupling.get("a").is_some() && coupling.get("b").is_some());

        let channel = &json["lindblad_channels"][0];
        assert_eq!(channel["description"], "🌾 → 🍂");
        assert_eq!(channel["type"], "lindblad");
        assert!(channel["rate"].is_number());
        assert!(channel["gate"].is_null());
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut biome = wheat_biome();
        biome.plant(0).unwrap();
        biome.entangle(0, 1, BellState::PsiPlus).unwrap();
        let saved = biome.save_state();
        let json = saved.to_json().unwrap();

        let mut other = wheat_biome();
        other.restore_state(&BiomeSnapshot::from_json(&json).unwrap()).unwrap();
        assert_eq!(other.rho(), biome.rho());
        assert_eq!(other.register().entries(), biome.register().entries());
        assert_eq!(other.plots(), biome.plots());
    }

    #[test]
    fn test_restore_repairs_unphysical_rho() {
        let mut biome = wheat_biome();
        let mut saved = biome.save_state();
        // |00⟩⟨00| and |01⟩⟨01| both 0.5 with coherence 0.6: eigenvalue −0.1
        saved.rho.iter_mut().for_each(|x| *x = 0.0);
        let dim = 4;
        saved.rho[0] = 0.5;
        saved.rho[(dim + 1) * 2] = 0.5;
        saved.rho[2] = 0.6;
        saved.rho[dim * 2] = 0.6;

        biome.restore_state(&saved).unwrap();
        assert!(biome.rho().min_eigenvalue().unwrap() >= -1e-9);
        assert!((biome.rho().trace() - 1.0).abs() < 1e-12);

        saved.rho[0] = f64::NAN;
        assert!(biome.restore_state(&saved).is_err());
    }

    #[test]
    fn test_restore_rejects_mismatched_rho() {
        let mut biome = wheat_biome();
        let mut saved = biome.save_state();
        saved.rho.truncate(4);
        let before = biome.rho().clone();
        assert!(biome.restore_state(&saved).is_err());
        assert_eq!(biome.rho(), &before);
    }
}
