//! Bell-pair preparation between two qubits of a biome

use crate::density::DensityMatrix;
use crate::error::ActionError;
use crate::operator::{C64, ZERO};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;
use std::fmt;
use std::str::FromStr;

/// The four maximally entangled two-qubit states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BellState {
    /// |Φ+⟩ = (|00⟩ + |11⟩)/√2
    #[default]
    PhiPlus,
    /// |Φ-⟩ = (|00⟩ - |11⟩)/√2
    PhiMinus,
    /// |Ψ+⟩ = (|01⟩ + |10⟩)/√2
    PsiPlus,
    /// |Ψ-⟩ = (|01⟩ - |10⟩)/√2 (singlet state)
    PsiMinus,
}

impl BellState {
    /// Coefficients for |00⟩, |01⟩, |10⟩, |11⟩
    pub fn amplitudes(self) -> [C64; 4] {
        let h = C64::new(FRAC_1_SQRT_2, 0.0);
        match self {
            BellState::PhiPlus => [h, ZERO, ZERO, h],
            BellState::PhiMinus => [h, ZERO, ZERO, -h],
            BellState::PsiPlus => [ZERO, h, h, ZERO],
            BellState::PsiMinus => [ZERO, h, -h, ZERO],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BellState::PhiPlus => "phi_plus",
            BellState::PhiMinus => "phi_minus",
            BellState::PsiPlus => "psi_plus",
            BellState::PsiMinus => "psi_minus",
        }
    }
}

impl fmt::Display for BellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BellState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phi_plus" => Ok(BellState::PhiPlus),
            "phi_minus" => Ok(BellState::PhiMinus),
            "psi_plus" => Ok(BellState::PsiPlus),
            "psi_minus" => Ok(BellState::PsiMinus),
            other => Err(format!("unknown Bell state '{other}'")),
        }
    }
}

/// Record of an explicit entangling action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntanglementLink {
    pub positions: (usize, usize),
    pub qubits: (usize, usize),
    pub bell: BellState,
    pub tick: u64,
}

/// ρ' = Tr_ab(ρ) ⊗ |Bell⟩⟨Bell|_ab, `a` taking the first digit of the Bell label
pub fn entangle(
    rho: &mut DensityMatrix,
    a: usize,
    b: usize,
    bell: BellState,
) -> Result<(), ActionError> {
    let n = rho.num_qubits();
    for q in [a, b] {
        if q >= n {
            return Err(ActionError::UnknownQubit(q));
        }
    }
    if a == b {
        return Err(ActionError::SamePosition(a));
    }

    rho.replace_pair(a, b, bell.amplitudes());
    log::debug!("entangled qubits {a} and {b} into {bell}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observables::{mutual_information, zz_correlation};

    #[test]
    fn test_parse_labels() {
        assert_eq!("phi_plus".parse::<BellState>(), Ok(BellState::PhiPlus));
        assert_eq!("psi_minus".parse::<BellState>(), Ok(BellState::PsiMinus));
        assert!("ghz".parse::<BellState>().is_err());
        assert_eq!(BellState::PsiPlus.to_string(), "psi_plus");
    }

    #[test]
    fn test_phi_plus_creates_correlation() {
        let mut rho = DensityMatrix::ground(3);
        entangle(&mut rho, 0, 2, BellState::PhiPlus).unwrap();

        assert!((rho.trace() - 1.0).abs() < 1e-12);
        assert!(mutual_information(&rho, 0, 2) > mutual_information(&rho, 0, 1));
        assert!((zz_correlation(&rho, 0, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_psi_states_anticorrelate() {
        let mut rho = DensityMatrix::ground(2);
        entangle(&mut rho, 1, 0, BellState::PsiMinus).unwrap();
        assert!((zz_correlation(&rho, 0, 1) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_qubits_rejected() {
        let mut rho = DensityMatrix::ground(2);
        assert_eq!(
            entangle(&mut rho, 0, 5, BellState::PhiPlus),
            Err(ActionError::UnknownQubit(5))
        );
        assert_eq!(
            entangle(&mut rho, 1, 1, BellState::PhiPlus),
            Err(ActionError::SamePosition(1))
        );
        assert_eq!(rho, DensityMatrix::ground(2));
    }
}
