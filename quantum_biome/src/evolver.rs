//! Master-equation integrator
//!
//! dρ/dt = −i[H(t), ρ] + Σ g_k γ_k D[L_k](ρ)
//!
//! Classic fourth-order Runge–Kutta, subcycled so no substep exceeds
//! `max_dt`. Gate factors are frozen for the duration of a substep. After
//! integration the state is renormalised, Hermitised and projected back onto
//! the positive cone, so drift never leaves the evolver.

use crate::config::{EvolutionConfig, RigorConfig};
use crate::density::DensityMatrix;
use crate::error::EvolveError;
use crate::hamiltonian::Hamiltonian;
use crate::lindblad::ChannelSet;
use crate::operator::{C64, ZERO};
use crate::validator::ValidatedEvolver;
use common::constants::TRACE_TOLERANCE;
use nalgebra::DMatrix;

/// One independent step request in a batch
#[derive(Debug, Clone, Copy)]
pub struct StepJob<'a> {
    pub rho: &'a DensityMatrix,
    pub hamiltonian: &'a Hamiltonian,
    pub channels: &'a ChannelSet,
    pub t: f64,
    pub dt: f64,
}

/// Anything that can advance a density matrix by one frame
pub trait Evolve {
    fn step(
        &self,
        rho: &DensityMatrix,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        t: f64,
        dt: f64,
    ) -> Result<DensityMatrix, EvolveError>;

    /// Step every job independently. A failing job does not affect the others.
    fn step_batch(&self, jobs: &[StepJob<'_>]) -> Vec<Result<DensityMatrix, EvolveError>> {
        jobs.iter()
            .map(|job| self.step(job.rho, job.hamiltonian, job.channels, job.t, job.dt))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rk4Evolver {
    pub max_dt: f64,
}

impl Default for Rk4Evolver {
    fn default() -> Self {
        Self::new(&EvolutionConfig::default())
    }
}

impl Rk4Evolver {
    pub fn new(config: &EvolutionConfig) -> Self {
        Self {
            max_dt: config.max_dt,
        }
    }

    fn check_dimensions(
        rho: &DensityMatrix,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
    ) -> Result<(), EvolveError> {
        let dim = rho.dim();
        if hamiltonian.dim() != dim {
            return Err(EvolveError::DimensionMismatch {
                what: "hamiltonian",
                expected: dim,
                found: hamiltonian.dim(),
            });
        }
        if channels.dim() != dim {
            return Err(EvolveError::DimensionMismatch {
                what: "lindblad channels",
                expected: dim,
                found: channels.dim(),
            });
        }
        Ok(())
    }

    /// Right-hand side of the master equation
    fn derivative(
        m: &DMatrix<C64>,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        rates: &[f64],
        t: f64,
    ) -> DMatrix<C64> {
        let mut out = DMatrix::from_element(m.nrows(), m.ncols(), ZERO);
        hamiltonian.accumulate_commutator(m, t, &mut out);
        channels.accumulate_dissipator(m, rates, &mut out);
        out
    }

    fn rk4_substep(
        m: &DMatrix<C64>,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        t: f64,
        h: f64,
    ) -> DMatrix<C64> {
        let rates = channels.effective_rates(m);
        let f = |state: &DMatrix<C64>, time: f64| {
            Self::derivative(state, hamiltonian, channels, &rates, time)
        };

        let k1 = f(m, t);
        let k2 = f(&(m + &k1 * C64::new(0.5 * h, 0.0)), t + 0.5 * h);
        let k3 = f(&(m + &k2 * C64::new(0.5 * h, 0.0)), t + 0.5 * h);
        let k4 = f(&(m + &k3 * C64::new(h, 0.0)), t + h);

        let increment = (k1 + (k2 + k3) * C64::new(2.0, 0.0) + k4) * C64::new(h / 6.0, 0.0);
        m + increment
    }
}

impl Evolve for Rk4Evolver {
    fn step(
        &self,
        rho: &DensityMatrix,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        t: f64,
        dt: f64,
    ) -> Result<DensityMatrix, EvolveError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(EvolveError::InvalidTimestep(dt));
        }
        Self::check_dimensions(rho, hamiltonian, channels)?;
        if dt == 0.0 {
            return Ok(rho.clone());
        }

        let substeps = (dt / self.max_dt).ceil().max(1.0) as usize;
        let h = dt / substeps as f64;

        let mut m = rho.matrix().clone();
        for k in 0..substeps {
            m = Self::rk4_substep(&m, hamiltonian, channels, t + k as f64 * h, h);
        }

        let mut next = DensityMatrix::from_matrix(m)?;
        if !next.is_finite() {
            log::warn!(
                "non-finite state after step (dim={}, dt={dt}); keeping previous state",
                rho.dim()
            );
            return Ok(rho.clone());
        }

        let trace = next.renormalize();
        if !(trace > 0.0) {
            log::warn!("trace collapsed to {trace} during step; keeping previous state");
            return Ok(rho.clone());
        }
        if (trace - 1.0).abs() > TRACE_TOLERANCE {
            log::debug!("renormalised trace drift {:.3e}", trace - 1.0);
        }

        next.hermitize();
        let clamped = next.project_psd();
        if clamped < 0.0 {
            log::debug!("clamped negative eigenvalue {clamped:.3e}");
        }

        Ok(next)
    }
}

/// The evolver a biome should use under `rigor`
pub fn build_evolver(rigor: &RigorConfig, evolution: &EvolutionConfig) -> Box<dyn Evolve> {
    let rk4 = Rk4Evolver::new(evolution);
    if rigor.enable_invariant_checks {
        log::info!("invariant checks enabled");
        Box::new(ValidatedEvolver::new(rk4, common::constants::HERMITICITY_TOLERANCE))
    } else {
        Box::new(rk4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faction::{DriverSpec, Faction};
    use crate::hamiltonian::HamiltonianBuilder;
    use crate::icon::merge_factions;
    use crate::lindblad::build_channels;
    use crate::register::RegisterMap;
    use nalgebra::Complex;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn decay_biome() -> (RegisterMap, Hamiltonian, ChannelSet) {
        let mut register = RegisterMap::new(4).unwrap();
        register.assign_axis("🌾", "🍂").unwrap();
        let icons = merge_factions(&[Faction::new("Rot", &["🌾", "🍂"])
            .with_self_energy("🌾", 0.3)
            .with_lindblad("🌾", "🍂", 0.5)])
        .unwrap();
        let h = HamiltonianBuilder::new(&register).build(&icons);
        let channels = ChannelSet::compile(build_channels(&icons, &register).unwrap(), 1);
        (register, h, channels)
    }

    #[test]
    fn test_amplitude_decay_matches_exponential() {
        let (_, h, channels) = decay_biome();
        let evolver = Rk4Evolver::default();
        let mut rho = DensityMatrix::ground(1);
        for frame in 0..50 {
            rho = evolver
                .step(&rho, &h, &channels, frame as f64 * 0.1, 0.1)
                .unwrap();
        }
        let expected = (-0.5_f64 * 5.0).exp();
        assert!((rho.population(0, 0) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unitary_rotation_preserves_purity() {
        let mut register = RegisterMap::new(4).unwrap();
        register.assign("☀").unwrap();
        let icons = merge_factions(&[Faction::new("Sun", &["☀"]).with_driver(
            "☀",
            DriverSpec {
                amplitude: 1.0,
                frequency: 0.0,
                phase: 0.0,
            },
        )])
        .unwrap();
        let h = HamiltonianBuilder::new(&register).build(&icons);
        let channels = ChannelSet::empty(1);

        let rho = DensityMatrix::ground(1);
        let next = Rk4Evolver::default()
            .step(&rho, &h, &channels, 0.0, std::f64::consts::FRAC_PI_4)
            .unwrap();
        // exp(−i X π/4) takes |0⟩ to an equal superposition
        assert!((next.population(0, 0) - 0.5).abs() < 1e-6);
        assert!((next.purity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_step_is_deterministic() {
        let (_, h, channels) = decay_biome();
        let evolver = Rk4Evolver::default();
        let plus = [Complex::new(FRAC_1_SQRT_2, 0.0); 2];
        let rho = DensityMatrix::product(&[plus]);
        let a = evolver.step(&rho, &h, &channels, 0.0, 0.05).unwrap();
        let b = evolver.step(&rho, &h, &channels, 0.0, 0.05).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_step_clamps_negative_spectrum_on_seven_qubits() {
        let dim = 1 << 7;
        let mut m = nalgebra::DMatrix::from_element(dim, dim, Complex::new(0.0, 0.0));
        m[(0, 0)] = Complex::new(0.5, 0.0);
        m[(1, 1)] = Complex::new(0.5, 0.0);
        m[(0, 1)] = Complex::new(0.6, 0.0);
        m[(1, 0)] = Complex::new(0.6, 0.0);
        let rho = DensityMatrix::from_matrix(m).unwrap();
        assert!(rho.min_eigenvalue().unwrap() < -0.05);

        let next = Rk4Evolver::default()
            .step(&rho, &Hamiltonian::zero(7), &ChannelSet::empty(7), 0.0, 0.01)
            .unwrap();
        assert_eq!(next.dim(), 128);
        assert!(next.min_eigenvalue().unwrap() >= -1e-6);
        assert!((next.trace() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_timestep_rejected() {
        let (_, h, channels) = decay_biome();
        let rho = DensityMatrix::ground(1);
        let evolver = Rk4Evolver::default();
        assert_eq!(
            evolver.step(&rho, &h, &channels, 0.0, -0.1),
            Err(EvolveError::InvalidTimestep(-0.1))
        );
        assert!(evolver.step(&rho, &h, &channels, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_batch_isolates_malformed_job() {
        let (_, h, channels) = decay_biome();
        let good = DensityMatrix::ground(1);
        let bad = DensityMatrix::ground(2);
        let jobs = [
            StepJob {
                rho: &good,
                hamiltonian: &h,
                channels: &channels,
                t: 0.0,
                dt: 0.1,
            },
            StepJob {
                rho: &bad,
                hamiltonian: &h,
                channels: &channels,
                t: 0.0,
                dt: 0.1,
            },
            StepJob {
                rho: &good,
                hamiltonian: &h,
                channels: &channels,
                t: 0.0,
                dt: 0.1,
            },
        ];
        let results = Rk4Evolver::default().step_batch(&jobs);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(EvolveError::DimensionMismatch { .. })
        ));
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn test_build_evolver_respects_invariant_flag() {
        let (_, h, channels) = decay_biome();
        let rho = DensityMatrix::ground(1);
        let rigor = RigorConfig {
            enable_invariant_checks: true,
            ..Default::default()
        };
        let evolver = build_evolver(&rigor, &EvolutionConfig::default());
        assert!(evolver.step(&rho, &h, &channels, 0.0, 0.1).is_ok());
    }
}
