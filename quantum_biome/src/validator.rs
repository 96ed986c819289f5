//! Debug-only physical consistency checks
//!
//! The validator wraps any [`Evolve`] implementation and inspects every state
//! it returns. It runs a full eigen-decomposition per step, so it stays off
//! unless `RigorConfig::enable_invariant_checks` asks for it.

use crate::density::DensityMatrix;
use crate::error::EvolveError;
use crate::evolver::{Evolve, StepJob};
use crate::hamiltonian::Hamiltonian;
use crate::lindblad::ChannelSet;
use std::fmt;

/// Measured deviations of one state from a valid density matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvariantReport {
    /// max |ρ − ρ†|
    pub hermiticity_residual: f64,
    /// |Tr ρ − 1|
    pub trace_deviation: f64,
    pub min_eigenvalue: f64,
    pub tolerance: f64,
}

impl InvariantReport {
    pub fn check(rho: &DensityMatrix, tolerance: f64) -> Self {
        // Fall back to the diagonal if the solver gives up; it bounds the spectrum from above
        let min_eigenvalue = rho.min_eigenvalue().unwrap_or_else(|| {
            (0..rho.dim())
                .map(|i| rho.get(i, i).re)
                .fold(f64::INFINITY, f64::min)
        });

        Self {
            hermiticity_residual: rho.hermiticity_residual(),
            trace_deviation: (rho.trace() - 1.0).abs(),
            min_eigenvalue,
            tolerance,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.hermiticity_residual <= self.tolerance
            && self.trace_deviation <= self.tolerance
            && self.min_eigenvalue >= -self.tolerance
    }
}

impl fmt::Display for InvariantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hermiticity residual {:.3e}, trace deviation {:.3e}, min eigenvalue {:.3e} (tolerance {:.1e})",
            self.hermiticity_residual, self.trace_deviation, self.min_eigenvalue, self.tolerance
        )
    }
}

/// Decorator that rejects any state failing [`InvariantReport::is_valid`]
#[derive(Debug, Clone)]
pub struct ValidatedEvolver<E> {
    inner: E,
    tolerance: f64,
}

impl<E: Evolve> ValidatedEvolver<E> {
    pub fn new(inner: E, tolerance: f64) -> Self {
        Self { inner, tolerance }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn verify(&self, rho: DensityMatrix) -> Result<DensityMatrix, EvolveError> {
        let report = InvariantReport::check(&rho, self.tolerance);
        if report.is_valid() {
            Ok(rho)
        } else {
            log::error!("invariant violation after step: {report}");
            Err(EvolveError::InvariantViolation(report))
        }
    }
}

impl<E: Evolve> Evolve for ValidatedEvolver<E> {
    fn step(
        &self,
        rho: &DensityMatrix,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        t: f64,
        dt: f64,
    ) -> Result<DensityMatrix, EvolveError> {
        self.inner
            .step(rho, hamiltonian, channels, t, dt)
            .and_then(|next| self.verify(next))
    }

    fn step_batch(&self, jobs: &[StepJob<'_>]) -> Vec<Result<DensityMatrix, EvolveError>> {
        self.inner
            .step_batch(jobs)
            .into_iter()
            .map(|result| result.and_then(|next| self.verify(next)))
            .collect()
    }
}
