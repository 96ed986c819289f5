//! Frame-synchronous orchestration of many biomes
//!
//! One [`Farm::tick`] runs three phases in order:
//! 1. evolve every biome through the lookahead engine
//! 2. apply queued player actions in request order
//! 3. extract observables and advance each biome's node layout
//!
//! Actions are validated when requested and invalidate the biome's cache
//! straight away; they touch ρ only in phase 2.

use crate::biome::{Biome, BiomeSnapshot};
use crate::config::{RigorConfig, SubstrateConfig};
use crate::entanglement::BellState;
use crate::error::{ActionError, BiomeError, BiomeResult, EvolveError};
use crate::evolver::{build_evolver, Evolve};
use crate::icon::IconTuning;
use crate::lookahead::{CacheState, InvalidationReason, LookaheadEngine, LookaheadStats, StepSource};
use crate::measurement::MeasurementProtocol;
use crate::observables::{all_mutual_information, all_zz_correlations, bloch_packet, ObservableSnapshot};
use crate::register::Pole;
use force_graph::{ForceGraphEngine, LayoutInputs, NodeLayout};
use glam::Vec2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Spacing between biome centers on the layout plane
const BIOME_SPACING: f32 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum Action {
    Plant,
    Measure,
    Harvest,
    Entangle { other: usize, bell: BellState },
}

impl Action {
    fn invalidation(&self) -> InvalidationReason {
        match self {
            Action::Plant => InvalidationReason::Plant,
            Action::Measure => InvalidationReason::Measurement,
            Action::Harvest => InvalidationReason::Harvest,
            Action::Entangle { .. } => InvalidationReason::Entanglement,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActionRequest {
    biome: usize,
    position: usize,
    action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum FarmEvent {
    Planted {
        biome: usize,
        position: usize,
    },
    Measured {
        biome: usize,
        position: usize,
        outcome_emoji: Option<String>,
        outcome: Pole,
        probability: f64,
        yield_modifier: f64,
    },
    Harvested {
        biome: usize,
        position: usize,
        emoji: Option<String>,
        yield_modifier: f64,
    },
    Entangled {
        biome: usize,
        positions: (usize, usize),
        bell: BellState,
    },
    ActionFailed {
        biome: usize,
        position: usize,
        action: Action,
        reason: String,
    },
    EvolutionFailed {
        biome: usize,
        reason: String,
    },
}

/// Summary of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub tick: u64,
    /// Per biome, in biome order
    pub sources: Vec<StepSource>,
    pub actions_applied: usize,
    pub actions_failed: usize,
    pub lookahead: LookaheadStats,
}

pub struct Farm {
    config: SubstrateConfig,
    biomes: Vec<Biome>,
    layouts: Vec<NodeLayout>,
    evolver: Box<dyn Evolve>,
    lookahead: LookaheadEngine,
    protocol: MeasurementProtocol,
    layout_engine: ForceGraphEngine,
    queue: VecDeque<ActionRequest>,
    events: Vec<FarmEvent>,
    rng: StdRng,
    tick: u64,
}

impl Farm {
    /// `seed` drives hardware-readout sampling
    pub fn new(config: SubstrateConfig, seed: u64) -> BiomeResult<Self> {
        config.validate()?;
        log::info!(
            "farm starting: readout={:?}, backaction={:?}, selective={:?}, lookahead={}",
            config.rigor.readout,
            config.rigor.backaction,
            config.rigor.selective,
            config.evolution.lookahead_steps
        );
        Ok(Self {
            evolver: build_evolver(&config.rigor, &config.evolution),
            lookahead: LookaheadEngine::new(config.evolution.lookahead_steps),
            protocol: MeasurementProtocol::new(config.rigor, config.measurement),
            layout_engine: ForceGraphEngine::new(config.layout),
            config,
            biomes: Vec::new(),
            layouts: Vec::new(),
            queue: VecDeque::new(),
            events: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
        })
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Add a biome; returns its id
    pub fn add_biome(&mut self, biome: Biome) -> usize {
        let id = self.biomes.len();
        let center = Vec2::new(id as f32 * BIOME_SPACING, 0.0);
        self.layouts
            .push(NodeLayout::new(center, biome.register().qubit_count()));
        log::info!("farm: added biome {id} '{}'", biome.name());
        self.biomes.push(biome);
        self.lookahead.invalidate(id, InvalidationReason::Composition);
        id
    }

    pub fn biome_count(&self) -> usize {
        self.biomes.len()
    }

    pub fn biome(&self, id: usize) -> Option<&Biome> {
        self.biomes.get(id)
    }

    fn biome_mut(&mut self, id: usize) -> Result<&mut Biome, ActionError> {
        self.biomes.get_mut(id).ok_or(ActionError::UnknownBiome(id))
    }

    pub fn cache_state(&self, biome: usize) -> Option<&CacheState> {
        self.lookahead.cache_state(biome)
    }

    pub fn lookahead_stats(&self) -> LookaheadStats {
        self.lookahead.stats()
    }

    /// Queue an action for the next frame. Unknown targets are rejected here.
    pub fn request_action(
        &mut self,
        biome: usize,
        position: usize,
        action: Action,
    ) -> Result<(), ActionError> {
        let target = self.biomes.get(biome).ok_or(ActionError::UnknownBiome(biome))?;
        let known = |p: usize| {
            target
                .plot(p)
                .map(|_| ())
                .map_err(|_| ActionError::UnknownPosition { biome, position: p })
        };
        known(position)?;
        if let Action::Entangle { other, .. } = action {
            known(other)?;
            if other == position {
                return Err(ActionError::SamePosition(position));
            }
        }

        self.lookahead.invalidate(biome, action.invalidation());
        self.queue.push_back(ActionRequest {
            biome,
            position,
            action,
        });
        Ok(())
    }

    /// Swap measurement rigor. Takes effect for the next action applied;
    /// every cached trajectory is dropped.
    pub fn set_rigor_config(&mut self, rigor: RigorConfig) {
        self.evolver = build_evolver(&rigor, &self.config.evolution);
        self.lookahead.invalidate_all(InvalidationReason::Reconfigured);
        self.config.rigor = rigor;
        self.protocol = MeasurementProtocol::new(rigor, self.config.measurement);
        log::info!("rigor config updated: {rigor:?}");
    }

    pub fn register_emoji(&mut self, biome: usize, emoji: &str) -> BiomeResult<usize> {
        let qubit = self.biome_mut(biome)?.register_emoji(emoji)?;
        self.lookahead.invalidate(biome, InvalidationReason::Composition);
        Ok(qubit)
    }

    pub fn retune_icon(&mut self, biome: usize, emoji: &str, tuning: &IconTuning) -> BiomeResult<()> {
        self.biome_mut(biome)?.retune_icon(emoji, tuning)?;
        self.lookahead.invalidate(biome, InvalidationReason::Composition);
        Ok(())
    }

    pub fn save_biome(&self, biome: usize) -> BiomeResult<BiomeSnapshot> {
        let target = self.biomes.get(biome).ok_or(ActionError::UnknownBiome(biome))?;
        Ok(target.save_state())
    }

    pub fn restore_biome(&mut self, biome: usize, snapshot: &BiomeSnapshot) -> BiomeResult<()> {
        self.biome_mut(biome)?.restore_state(snapshot)?;
        self.lookahead.invalidate(biome, InvalidationReason::Restore);
        Ok(())
    }

    /// Run one frame of length `dt`
    pub fn tick(&mut self, dt: f64) -> BiomeResult<FrameReport> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(EvolveError::InvalidTimestep(dt).into());
        }

        // 1. evolution
        let reports = self.lookahead.advance(&mut self.biomes, self.evolver.as_ref(), dt);
        let mut sources = Vec::with_capacity(reports.len());
        for report in reports {
            if let Err(err) = report.result {
                self.events.push(FarmEvent::EvolutionFailed {
                    biome: report.biome,
                    reason: err.to_string(),
                });
            }
            sources.push(report.source);
        }

        // 2. queued actions
        let mut applied = 0;
        let mut failed = 0;
        while let Some(request) = self.queue.pop_front() {
            match self.apply(request) {
                Ok(event) => {
                    applied += 1;
                    self.events.push(event);
                }
                Err(err) => {
                    failed += 1;
                    log::warn!(
                        "action {:?} on biome {} position {} failed: {err}",
                        request.action,
                        request.biome,
                        request.position
                    );
                    self.events.push(FarmEvent::ActionFailed {
                        biome: request.biome,
                        position: request.position,
                        action: request.action,
                        reason: err.to_string(),
                    });
                }
            }
        }

        // 3. layout
        for (biome, layout) in self.biomes.iter().zip(self.layouts.iter_mut()) {
            let rho = biome.rho();
            layout.resize(rho.num_qubits());
            layout.frozen.iter_mut().for_each(|f| *f = false);
            for q in biome.measured_qubits() {
                layout.set_frozen(q, true);
            }

            let packet = bloch_packet(rho);
            let mi = all_mutual_information(rho);
            let corr = all_zz_correlations(rho);
            self.layout_engine.update(
                layout,
                LayoutInputs {
                    bloch_packet: &packet,
                    mutual_information: &mi,
                    correlations: &corr,
                },
                dt as f32,
            );
        }

        self.tick += 1;
        Ok(FrameReport {
            tick: self.tick,
            sources,
            actions_applied: applied,
            actions_failed: failed,
            lookahead: self.lookahead.stats(),
        })
    }

    fn apply(&mut self, request: ActionRequest) -> Result<FarmEvent, BiomeError> {
        let ActionRequest {
            biome: id,
            position,
            action,
        } = request;
        // Phase 1 may have refilled the cache from the pre-action state
        self.lookahead.invalidate(id, action.invalidation());

        let protocol = self.protocol;
        let biome = self.biomes.get_mut(id).ok_or(ActionError::UnknownBiome(id))?;
        perform(biome, id, position, action, &protocol, &mut self.rng).map_err(|err| match err {
            BiomeError::Action(err) => BiomeError::Action(err.in_biome(id)),
            other => other,
        })
    }

    pub fn get_observable_snapshot(&self, biome: usize) -> Result<ObservableSnapshot, ActionError> {
        self.biomes
            .get(biome)
            .map(Biome::snapshot)
            .ok_or(ActionError::UnknownBiome(biome))
    }

    /// Take every event emitted since the last call
    pub fn drain_events(&mut self) -> Vec<FarmEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn node_positions(&self, biome: usize) -> Option<&[f32]> {
        self.layouts.get(biome).map(NodeLayout::positions_flat)
    }

    pub fn node_velocities(&self, biome: usize) -> Option<&[f32]> {
        self.layouts.get(biome).map(NodeLayout::velocities_flat)
    }

    pub fn layout(&self, biome: usize) -> Option<&NodeLayout> {
        self.layouts.get(biome)
    }
}

fn perform(
    biome: &mut Biome,
    id: usize,
    position: usize,
    action: Action,
    protocol: &MeasurementProtocol,
    rng: &mut StdRng,
) -> Result<FarmEvent, BiomeError> {
    let event = match action {
        Action::Plant => {
            biome.plant(position)?;
            FarmEvent::Planted { biome: id, position }
        }
        Action::Measure => {
            let measured = biome.measure(position, protocol, rng)?;
            FarmEvent::Measured {
                biome: id,
                position,
                outcome_emoji: measured.outcome_emoji,
                outcome: measured.result.outcome,
                probability: measured.result.probability,
                yield_modifier: measured.result.yield_modifier,
            }
        }
        Action::Harvest => {
            let harvest = biome.harvest(position)?;
            FarmEvent::Harvested {
                biome: id,
                position,
                emoji: harvest.emoji,
                yield_modifier: harvest.yield_modifier,
            }
        }
        Action::Entangle { other, bell } => {
            biome.entangle(position, other, bell)?;
            FarmEvent::Entangled {
                biome: id,
                positions: (position, other),
                bell,
            }
        }
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackactionMode, ReadoutMode};
    use crate::faction::Faction;

    fn field() -> Biome {
        Biome::builder("Field")
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

    fn inspector_farm() -> Farm {
        let mut config = SubstrateConfig::default();
        config.rigor.readout = ReadoutMode::Inspector;
        config.rigor.backaction = BackactionMode::LabTrue;
        let mut farm = Farm::new(config, 5).unwrap();
        farm.add_biome(field());
        farm
    }

    #[test]
    fn test_unknown_targets_rejected_without_side_effects() {
        let mut farm = inspector_farm();
        assert_eq!(
            farm.request_action(3, 0, Action::Plant),
            Err(ActionError::UnknownBiome(3))
        );
        assert_eq!(
            farm.request_action(0, 7, Action::Plant),
            Err(ActionError::UnknownPosition {
                biome: 0,
                position: 7
            })
        );
        let report = farm.tick(0.05).unwrap();
        assert_eq!(report.actions_applied, 0);
        assert!(farm.drain_events().is_empty());
    }

    #[test]
    fn test_plant_then_measure_emits_event() {
        let mut farm = inspector_farm();
        farm.request_action(0, 0, Action::Plant).unwrap();
        farm.tick(0.05).unwrap();
        farm.request_action(0, 0, Action::Measure).unwrap();
        farm.tick(0.05).unwrap();

        let events = farm.drain_events();
        assert!(matches!(events[0], FarmEvent::Planted { biome: 0, position: 0 }));
        match &events[1] {
            FarmEvent::Measured {
                outcome_emoji,
                yield_modifier,
                ..
            } => {
                assert!(outcome_emoji.is_some());
                assert!(*yield_modifier >= 1.0);
            }
            other => panic!("expected measurement event, got {other:?}"),
        }
    }

    #[test]
    fn test_measure_request_invalidates_cache() {
        let mut farm = inspector_farm();
        farm.tick(0.05).unwrap();
        assert!(farm.cache_state(0).unwrap().is_cached());

        farm.request_action(0, 1, Action::Plant).unwrap();
        assert_eq!(farm.cache_state(0), Some(&CacheState::Stale));
        let report = farm.tick(0.05).unwrap();
        assert_eq!(report.sources[0], StepSource::Fresh);
    }

    #[test]
    fn test_failed_action_reported_as_event() {
        let mut farm = inspector_farm();
        farm.request_action(0, 0, Action::Harvest).unwrap();
        let report = farm.tick(0.05).unwrap();
        assert_eq!(report.actions_failed, 1);
        assert!(matches!(
            farm.drain_events()[0],
            FarmEvent::ActionFailed { position: 0, .. }
        ));
    }

    #[test]
    fn test_layout_tracks_register_size() {
        let mut farm = inspector_farm();
        farm.tick(0.05).unwrap();
        assert_eq!(farm.node_positions(0).unwrap().len(), 4);

        farm.register_emoji(0, "💧").unwrap();
        farm.tick(0.05).unwrap();
        assert_eq!(farm.node_positions(0).unwrap().len(), 6);
        assert_eq!(farm.node_velocities(0).unwrap().len(), 6);
    }

    #[test]
    fn test_failed_action_names_its_biome() {
        let mut farm = inspector_farm();
        farm.add_biome(field());
        farm.request_action(1, 1, Action::Plant).unwrap();

        // Shrink biome 1 to a single plot before the queued plant lands
        let mut saved = farm.save_biome(1).unwrap();
        saved.plots.truncate(1);
        farm.restore_biome(1, &saved).unwrap();
        farm.tick(0.05).unwrap();

        match &farm.drain_events()[0] {
            FarmEvent::ActionFailed { biome, reason, .. } => {
                assert_eq!(*biome, 1);
                assert!(reason.contains("biome 1 has no plot at position 1"), "{reason}");
            }
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_dt_rejected() {
        let mut farm = inspector_farm();
        assert!(farm.tick(0.0).is_err());
        assert!(farm.tick(f64::INFINITY).is_err());
    }
}
