//! Measurement and collapse
//!
//! A measurement reads one qubit in its pole basis. How the outcome is chosen,
//! how hard ρ collapses and what happens to the unobserved branch are three
//! independent settings taken from [`RigorConfig`].

use crate::config::{BackactionMode, MeasurementTuning, ReadoutMode, RigorConfig, SelectiveMeasureModel};
use crate::density::DensityMatrix;
use crate::error::MeasurementError;
use crate::operator::{C64, ONE, ZERO};
use crate::register::Pole;
use common::constants::PROBABILITY_EPSILON;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub qubit: usize,
    pub outcome: Pole,
    /// Probability of the branch that was kept
    pub probability: f64,
    /// Born distribution `[p_north, p_south]` before measurement
    pub distribution: [f64; 2],
    /// Post-measurement state
    pub state: DensityMatrix,
    pub yield_modifier: f64,
    /// Detector response under the click / no-click model
    pub clicked: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementProtocol {
    pub rigor: RigorConfig,
    pub tuning: MeasurementTuning,
}

impl MeasurementProtocol {
    pub fn new(rigor: RigorConfig, tuning: MeasurementTuning) -> Self {
        Self { rigor, tuning }
    }

    /// Measure `qubit` of `rho`. `rho` itself is never modified.
    pub fn measure<R: Rng + ?Sized>(
        &self,
        rho: &DensityMatrix,
        qubit: usize,
        rng: &mut R,
    ) -> Result<MeasurementResult, MeasurementError> {
        if qubit >= rho.num_qubits() {
            return Err(MeasurementError::QubitOutOfRange {
                qubit,
                num_qubits: rho.num_qubits(),
            });
        }

        let p_south = rho.population(qubit, 1).clamp(0.0, 1.0);
        let distribution = [1.0 - p_south, p_south];

        let result = match self.rigor.selective {
            SelectiveMeasureModel::PostselectCosted => {
                self.postselect(rho, qubit, distribution, rng)?
            }
            SelectiveMeasureModel::ClickNoClick => self.click_no_click(rho, qubit, distribution, rng)?,
        };

        log::debug!(
            "measured qubit {qubit}: {:?} (p={:.4}, yield={:.3})",
            result.outcome,
            result.probability,
            result.yield_modifier
        );
        Ok(result)
    }

    /// Choose branch 0 or 1 given the probability of branch 1
    fn select<R: Rng + ?Sized>(&self, p_one: f64, rng: &mut R) -> usize {
        match self.rigor.readout {
            ReadoutMode::Hardware => usize::from(rng.gen::<f64>() < p_one),
            // Ties go to branch 0
            ReadoutMode::Inspector => usize::from(p_one > 0.5),
        }
    }

    fn postselect<R: Rng + ?Sized>(
        &self,
        rho: &DensityMatrix,
        qubit: usize,
        distribution: [f64; 2],
        rng: &mut R,
    ) -> Result<MeasurementResult, MeasurementError> {
        let branch = self.select(distribution[1], rng);
        let probability = distribution[branch];
        if probability < PROBABILITY_EPSILON {
            return Err(MeasurementError::ZeroProbability);
        }

        let projector = if branch == 0 { [ONE, ZERO] } else { [ZERO, ONE] };
        let collapsed = kraus_branch(rho, qubit, projector)?;

        Ok(MeasurementResult {
            qubit,
            outcome: Pole::from_bit(branch),
            probability,
            distribution,
            state: self.apply_backaction(rho, collapsed)?,
            yield_modifier: (1.0 / probability).min(self.tuning.postselect_cap),
            clicked: None,
        })
    }

    fn click_no_click<R: Rng + ?Sized>(
        &self,
        rho: &DensityMatrix,
        qubit: usize,
        distribution: [f64; 2],
        rng: &mut R,
    ) -> Result<MeasurementResult, MeasurementError> {
        let eta = self.tuning.detector_efficiency.clamp(0.0, 1.0);
        let p_click = eta * distribution[1];

        let clicked = self.select(p_click, rng) == 1;
        let (kraus, probability) = if clicked {
            ([ZERO, C64::new(eta.sqrt(), 0.0)], p_click)
        } else {
            ([ONE, C64::new((1.0 - eta).sqrt(), 0.0)], 1.0 - p_click)
        };
        if probability < PROBABILITY_EPSILON {
            return Err(MeasurementError::ZeroProbability);
        }

        let mut post = kraus_branch(rho, qubit, kraus)?;
        let mut outcome = if clicked { Pole::South } else { Pole::North };
        let mut probability = probability;

        // A silent detector is only a weak measurement; full collapse still
        // projects the qubit onto a pole, possibly a missed south.
        if self.rigor.backaction == BackactionMode::LabTrue && !clicked {
            let p_south = post.population(qubit, 1).clamp(0.0, 1.0);
            let branch = self.select(p_south, rng);
            let p_branch = [1.0 - p_south, p_south][branch];
            let projector = if branch == 0 { [ONE, ZERO] } else { [ZERO, ONE] };
            post = kraus_branch(&post, qubit, projector)?;
            outcome = Pole::from_bit(branch);
            probability *= p_branch;
        }

        Ok(MeasurementResult {
            qubit,
            outcome,
            probability,
            distribution,
            state: self.apply_backaction(rho, post)?,
            yield_modifier: 1.0,
            clicked: Some(clicked),
        })
    }

    fn apply_backaction(
        &self,
        rho: &DensityMatrix,
        collapsed: DensityMatrix,
    ) -> Result<DensityMatrix, MeasurementError> {
        match self.rigor.backaction {
            BackactionMode::LabTrue => Ok(collapsed),
            BackactionMode::KidLight => {
                let s = self.tuning.kid_light_strength;
                let mixed = rho.matrix() * C64::new(1.0 - s, 0.0)
                    + collapsed.matrix() * C64::new(s, 0.0);
                let mut state = DensityMatrix::from_matrix(mixed)
                    .map_err(|_| MeasurementError::ZeroProbability)?;
                state.renormalize();
                Ok(state)
            }
        }
    }
}

/// K ρ K† / Tr(K ρ K†) for a qubit-diagonal Kraus operator
fn kraus_branch(
    rho: &DensityMatrix,
    qubit: usize,
    kraus: [C64; 2],
) -> Result<DensityMatrix, MeasurementError> {
    let mut branch = rho.clone();
    branch.apply_diagonal_kraus(qubit, kraus);
    let trace = branch.renormalize();
    if trace < PROBABILITY_EPSILON {
        return Err(MeasurementError::ZeroProbability);
    }
    Ok(branch)
}
