//! Multi-biome evolution scheduler with trajectory caching
//!
//! Every frame each biome either replays a precomputed state or is stepped
//! fresh. Fresh steps for all biomes go through one `step_batch` call. A
//! static biome (no adaptive icons) also gets its next `lookahead_steps − 1`
//! frames precomputed, level by level across biomes, under the assumption
//! that Δt stays the same. Any discrete change to a biome drops its cache.
//!
//! A cached entry is keyed by the biome tick it starts from and the Δt it was
//! computed with; it is only replayed when both match the current frame.

use crate::biome::Biome;
use crate::density::DensityMatrix;
use crate::error::EvolveError;
use crate::evolver::{Evolve, StepJob};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedStep {
    /// Biome tick this step starts from
    pub tick: u64,
    pub dt: f64,
    pub rho: DensityMatrix,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheState {
    /// Last frame was computed directly; nothing precomputed
    #[default]
    Fresh,
    Cached {
        trajectory: VecDeque<CachedStep>,
        /// Biome tick reached after the last cached step; nothing at or past it replays
        valid_until_tick: u64,
    },
    /// Invalidated; the next frame must be computed fresh
    Stale,
}

impl CacheState {
    pub fn is_cached(&self) -> bool {
        matches!(self, CacheState::Cached { .. })
    }

    pub fn cached_steps(&self) -> usize {
        match self {
            CacheState::Cached { trajectory, .. } => trajectory.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepSource {
    Fresh,
    Replayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationReason {
    Measurement,
    Entanglement,
    Plant,
    Harvest,
    Composition,
    Restore,
    Reconfigured,
    TimestepChanged,
    /// Cached ticks no longer line up with the biome clock
    ClockMismatch,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvalidationReason::Measurement => "measurement",
            InvalidationReason::Entanglement => "entanglement",
            InvalidationReason::Plant => "plant",
            InvalidationReason::Harvest => "harvest",
            InvalidationReason::Composition => "composition change",
            InvalidationReason::Restore => "state restore",
            InvalidationReason::Reconfigured => "reconfiguration",
            InvalidationReason::TimestepChanged => "timestep change",
            InvalidationReason::ClockMismatch => "clock mismatch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LookaheadStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub precomputed: u64,
}

/// What happened to one biome this frame
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub biome: usize,
    pub source: StepSource,
    pub result: Result<(), EvolveError>,
}

#[derive(Debug, Clone)]
pub struct LookaheadEngine {
    lookahead_steps: usize,
    slots: Vec<CacheState>,
    stats: LookaheadStats,
}

impl LookaheadEngine {
    pub fn new(lookahead_steps: usize) -> Self {
        Self {
            lookahead_steps: lookahead_steps.max(1),
            slots: Vec::new(),
            stats: LookaheadStats::default(),
        }
    }

    pub fn lookahead_steps(&self) -> usize {
        self.lookahead_steps
    }

    pub fn stats(&self) -> LookaheadStats {
        self.stats
    }

    pub fn cache_state(&self, biome: usize) -> Option<&CacheState> {
        self.slots.get(biome)
    }

    fn ensure_slots(&mut self, count: usize) {
        if self.slots.len() < count {
            self.slots.resize(count, CacheState::Fresh);
        }
    }

    pub fn invalidate(&mut self, biome: usize, reason: InvalidationReason) {
        self.ensure_slots(biome + 1);
        if self.slots[biome].is_cached() {
            log::debug!("biome {biome}: cache dropped ({reason})");
        }
        self.slots[biome] = CacheState::Stale;
        self.stats.invalidations += 1;
    }

    pub fn invalidate_all(&mut self, reason: InvalidationReason) {
        for biome in 0..self.slots.len() {
            self.invalidate(biome, reason);
        }
    }

    /// Pop the cached step for this frame if it matches tick and Δt
    fn take_replay(&mut self, biome: usize, tick: u64, dt: f64) -> Option<DensityMatrix> {
        let CacheState::Cached {
            trajectory,
            valid_until_tick,
        } = &mut self.slots[biome]
        else {
            return None;
        };

        let reason = match trajectory.front() {
            _ if tick >= *valid_until_tick => Some(InvalidationReason::ClockMismatch),
            Some(step) if step.dt.to_bits() != dt.to_bits() => {
                Some(InvalidationReason::TimestepChanged)
            }
            Some(step) if step.tick == tick => None,
            _ => Some(InvalidationReason::ClockMismatch),
        };
        if let Some(reason) = reason {
            self.invalidate(biome, reason);
            return None;
        }

        let step = trajectory.pop_front()?;
        if trajectory.is_empty() {
            self.slots[biome] = CacheState::Fresh;
        }
        Some(step.rho)
    }

    /// Advance every biome by one frame of length `dt`
    pub fn advance(
        &mut self,
        biomes: &mut [Biome],
        evolver: &dyn Evolve,
        dt: f64,
    ) -> Vec<StepReport> {
        self.ensure_slots(biomes.len());
        let mut reports = Vec::with_capacity(biomes.len());
        let mut fresh: Vec<usize> = Vec::new();

        for (i, biome) in biomes.iter_mut().enumerate() {
            match self.take_replay(i, biome.tick(), dt) {
                Some(rho) => {
                    biome.advance(rho, dt);
                    self.stats.hits += 1;
                    reports.push(StepReport {
                        biome: i,
                        source: StepSource::Replayed,
                        result: Ok(()),
                    });
                }
                None => {
                    self.stats.misses += 1;
                    fresh.push(i);
                }
            }
        }

        if fresh.is_empty() {
            return reports;
        }

        let results = {
            let jobs: Vec<StepJob<'_>> = fresh
                .iter()
                .map(|&i| {
                    let b = &biomes[i];
                    StepJob {
                        rho: b.rho(),
                        hamiltonian: b.hamiltonian(),
                        channels: b.channels(),
                        t: b.time(),
                        dt,
                    }
                })
                .collect();
            evolver.step_batch(&jobs)
        };

        let mut precompute: Vec<usize> = Vec::new();
        for (&i, result) in fresh.iter().zip(results) {
            let result = match result {
                Ok(rho) => {
                    biomes[i].advance(rho, dt);
                    self.slots[i] = CacheState::Fresh;
                    if self.lookahead_steps > 1 && biomes[i].is_static() {
                        precompute.push(i);
                    }
                    Ok(())
                }
                Err(err) => {
                    log::warn!("biome {i} ('{}') failed to evolve: {err}", biomes[i].name());
                    self.slots[i] = CacheState::Stale;
                    Err(err)
                }
            };
            reports.push(StepReport {
                biome: i,
                source: StepSource::Fresh,
                result,
            });
        }
        reports.sort_by_key(|r| r.biome);

        self.precompute(biomes, evolver, dt, &precompute);
        reports
    }

    /// Fill the caches of `targets` with up to `lookahead_steps − 1` future frames
    fn precompute(&mut self, biomes: &[Biome], evolver: &dyn Evolve, dt: f64, targets: &[usize]) {
        // (biome, trajectory, next start tick, next start time)
        let mut pending: Vec<(usize, VecDeque<CachedStep>, u64, f64)> = targets
            .iter()
            .map(|&i| (i, VecDeque::new(), biomes[i].tick(), biomes[i].time()))
            .collect();

        for _ in 1..self.lookahead_steps {
            let results = {
                let jobs: Vec<StepJob<'_>> = pending
                    .iter()
                    .map(|(i, trajectory, _, time)| StepJob {
                        rho: trajectory.back().map_or(biomes[*i].rho(), |s| &s.rho),
                        hamiltonian: biomes[*i].hamiltonian(),
                        channels: biomes[*i].channels(),
                        t: *time,
                        dt,
                    })
                    .collect();
                evolver.step_batch(&jobs)
            };

            let mut next = Vec::with_capacity(pending.len());
            for ((i, mut trajectory, tick, time), result) in pending.into_iter().zip(results) {
                match result {
                    Ok(rho) => {
                        trajectory.push_back(CachedStep { tick, dt, rho });
                        next.push((i, trajectory, tick + 1, time + dt));
                    }
                    Err(err) => {
                        log::debug!("biome {i}: lookahead stopped early: {err}");
                        self.store(i, trajectory, tick);
                    }
                }
            }
            pending = next;
        }

        for (i, trajectory, tick, _) in pending {
            self.store(i, trajectory, tick);
        }
    }

    fn store(&mut self, biome: usize, trajectory: VecDeque<CachedStep>, valid_until_tick: u64) {
        if trajectory.is_empty() {
            return;
        }
        self.stats.precomputed += trajectory.len() as u64;
        self.slots[biome] = CacheState::Cached {
            trajectory,
            valid_until_tick,
        };
    }
}
