//! Headless Biome Farm
//!
//! Runs a small two-biome farm for a fixed number of frames and logs what the
//! substrate does: evolution, lookahead hits, measurements and harvests.
//!
//! Usage: `biome_farm [config.json] [frames] [factions.json]`
//!
//! Set `RUST_LOG=debug` for per-step detail.

use quantum_biome::faction::{DriverSpec, GatedChannel};
use quantum_biome::{
    load_factions, Action, BellState, Biome, BiomeResult, Faction, Farm, FarmEvent, SubstrateConfig,
};
use std::env;

const FRAME_DT: f64 = 1.0 / 60.0;
const DEFAULT_FRAMES: u64 = 600;

fn demo_factions() -> Vec<Faction> {
    vec![
        Faction::new("Growers", &["🌾", "🍂", "☀", "💧"])
            .with_self_energy("🌾", 0.4)
            .with_self_energy("🍂", -0.1)
            .with_coupling("🌾", "☀", 0.2)
            .with_coupling("🌾", "🍂", 0.05)
            .with_lindblad("🌾", "🍂", 0.02)
            .with_gated(GatedChannel {
                source: "🍂".to_string(),
                target: "🌾".to_string(),
                gate: "💧".to_string(),
                rate: 0.08,
                threshold: 0.3,
                inverse: false,
            }),
        Faction::new("Decomposers", &["🌾", "🍂", "🍄"])
            .with_lindblad("🌾", "🍂", 0.03)
            .with_coupling("🍂", "🍄", 0.12),
        Faction::new("Weather", &["☀", "💧"])
            .with_driver(
                "☀",
                DriverSpec {
                    amplitude: 0.3,
                    frequency: 0.8,
                    phase: 0.0,
                },
            )
            .with_incoming("💧", "☀", 0.01),
    ]
}

fn build_biomes(config: &SubstrateConfig, factions: &[Faction]) -> BiomeResult<Vec<Biome>> {
    let field = Biome::builder("Wheat Field")
        .factions(factions.iter().cloned())
        .axis("🌾", "🍂")
        .emoji("☀")
        .emoji("💧")
        .plot("🌾")
        .plot("☀")
        .plot("💧")
        .max_qubits(config.max_qubits)
        .entropy_mode(config.evolution.entropy_mode)
        .build()?;

    let forest = Biome::builder("Mushroom Grove")
        .factions(factions.iter().cloned())
        .axis("🍂", "🍄")
        .emoji("💧")
        .plot("🍂")
        .plot("💧")
        .max_qubits(config.max_qubits)
        .entropy_mode(config.evolution.entropy_mode)
        .build()?;

    Ok(vec![field, forest])
}

/// Scripted player: plant, entangle, measure and harvest on a fixed schedule
fn schedule(farm: &mut Farm, frame: u64) {
    let requests: &[(usize, usize, Action)] = match frame {
        10 => &[(0, 0, Action::Plant), (0, 1, Action::Plant), (1, 0, Action::Plant)],
        60 => &[(
            0,
            0,
            Action::Entangle {
                other: 2,
                bell: BellState::PhiPlus,
            },
        )],
        240 => &[(0, 0, Action::Measure), (1, 0, Action::Measure)],
        300 => &[(0, 0, Action::Harvest), (1, 0, Action::Harvest)],
        _ => &[],
    };
    for &(biome, position, action) in requests {
        if let Err(err) = farm.request_action(biome, position, action) {
            log::warn!("frame {frame}: request rejected: {err}");
        }
    }
}

fn run() -> BiomeResult<()> {
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => SubstrateConfig::load(path)?,
        None => SubstrateConfig::default(),
    };
    let frames = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);
    let factions = match args.get(3) {
        Some(path) => load_factions(path)?,
        None => demo_factions(),
    };

    let mut farm = Farm::new(config.clone(), 42)?;
    for biome in build_biomes(&config, &factions)? {
        farm.add_biome(biome);
    }

    for frame in 0..frames {
        schedule(&mut farm, frame);
        let report = farm.tick(FRAME_DT)?;

        for event in farm.drain_events() {
            match &event {
                FarmEvent::Measured {
                    biome,
                    position,
                    outcome_emoji,
                    probability,
                    yield_modifier,
                    ..
                } => log::info!(
                    "biome {biome} plot {position}: observed {} (p={probability:.3}, yield x{yield_modifier:.2})",
                    outcome_emoji.as_deref().unwrap_or("∅")
                ),
                FarmEvent::ActionFailed { reason, .. } | FarmEvent::EvolutionFailed { reason, .. } => {
                    log::warn!("{reason}")
                }
                other => log::info!("{other:?}"),
            }
        }

        if frame % 60 == 0 {
            for id in 0..farm.biome_count() {
                let snapshot = farm.get_observable_snapshot(id)?;
                log::info!(
                    "tick {} biome {id}: purity={:.4} entropy={:.4} source={:?}",
                    snapshot.tick,
                    snapshot.purity,
                    snapshot.entropy,
                    report.sources.get(id)
                );
            }
        }
    }

    let stats = farm.lookahead_stats();
    log::info!(
        "done after {} frames: {} replayed, {} computed, {} invalidations",
        farm.tick_count(),
        stats.hits,
        stats.misses,
        stats.invalidations
    );
    if let Some(biome) = farm.biome(0) {
        log::debug!("final state: {}", biome.save_state().to_json()?);
    }
    Ok(())
}

fn main() {
    common::init_logging();
    log::info!("Starting Biome Farm");

    if let Err(err) = run() {
        log::error!("biome farm failed: {err}");
        std::process::exit(1);
    }
}
