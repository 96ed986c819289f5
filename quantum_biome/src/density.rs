//! Density matrix of a biome register
//!
//! Qubit `q` is bit `q` of the basis index. Bit 0 is the north pole, bit 1 the
//! south pole.

use crate::error::EvolveError;
use crate::operator::{bit, with_bit, C64, ONE, ZERO};
use nalgebra::{Complex, DMatrix, DVector, Matrix2, Matrix4, Normed, SymmetricEigen};

/// Iteration ceiling for Hermitian eigen-decompositions
const EIGEN_MAX_ITERATIONS: usize = 10_000;

/// Hermitian eigenvalues of `m`, ascending. `None` if the solver does not converge.
pub fn hermitian_eigenvalues(m: &DMatrix<C64>) -> Option<DVector<f64>> {
    let eigen = SymmetricEigen::try_new(m.clone(), f64::EPSILON, EIGEN_MAX_ITERATIONS)?;
    let mut values: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    Some(DVector::from_vec(values))
}

/// Eigenvalues of a 4×4 Hermitian block (two-qubit marginal)
pub fn eigenvalues4(m: &Matrix4<C64>) -> Option<[f64; 4]> {
    let eigen = SymmetricEigen::try_new(*m, f64::EPSILON, EIGEN_MAX_ITERATIONS)?;
    let e = eigen.eigenvalues;
    Some([e[0], e[1], e[2], e[3]])
}

/// Probability that `qubit` of a raw 2^n matrix reads `pole_bit`
pub fn diagonal_population(matrix: &DMatrix<C64>, qubit: usize, pole_bit: usize) -> f64 {
    (0..matrix.nrows())
        .filter(|&i| bit(i, qubit) == pole_bit)
        .map(|i| matrix[(i, i)].re)
        .sum()
}

/// Density matrix ρ over `num_qubits` qubits
#[derive(Debug, Clone, PartialEq)]
pub struct DensityMatrix {
    matrix: DMatrix<C64>,
    num_qubits: usize,
}

impl DensityMatrix {
    /// Product state with every qubit on its north pole: |0…0⟩⟨0…0|
    pub fn ground(num_qubits: usize) -> Self {
        let dim = 1 << num_qubits;
        let mut matrix = DMatrix::from_element(dim, dim, ZERO);
        matrix[(0, 0)] = ONE;
        Self { matrix, num_qubits }
    }

    /// Product of single-qubit pure states `α|0⟩ + β|1⟩`, qubit 0 first
    pub fn product(qubits: &[[C64; 2]]) -> Self {
        let num_qubits = qubits.len();
        let dim = 1 << num_qubits;
        let amplitudes: Vec<C64> = (0..dim)
            .map(|index| {
                qubits
                    .iter()
                    .enumerate()
                    .fold(ONE, |acc, (q, amp)| acc * amp[bit(index, q)])
            })
            .collect();
        Self::from_pure(&amplitudes)
    }

    /// |ψ⟩⟨ψ| for a state vector of length 2^n (normalised here)
    pub fn from_pure(amplitudes: &[C64]) -> Self {
        let dim = amplitudes.len().next_power_of_two();
        let num_qubits = dim.trailing_zeros() as usize;
        let norm_sq: f64 = amplitudes.iter().map(|a| a.norm_sqr()).sum();
        let scale = if norm_sq > 0.0 { 1.0 / norm_sq } else { 0.0 };

        let matrix = DMatrix::from_fn(dim, dim, |i, j| {
            let a = amplitudes.get(i).copied().unwrap_or(ZERO);
            let b = amplitudes.get(j).copied().unwrap_or(ZERO);
            a * b.conj() * scale
        });
        Self { matrix, num_qubits }
    }

    /// Wrap an existing square matrix of dimension 2^n
    pub fn from_matrix(matrix: DMatrix<C64>) -> Result<Self, EvolveError> {
        let dim = matrix.nrows();
        if matrix.ncols() != dim {
            return Err(EvolveError::DimensionMismatch {
                what: "density matrix columns",
                expected: dim,
                found: matrix.ncols(),
            });
        }
        if dim == 0 || !dim.is_power_of_two() {
            return Err(EvolveError::DimensionMismatch {
                what: "density matrix",
                expected: dim.next_power_of_two().max(1),
                found: dim,
            });
        }
        Ok(Self {
            num_qubits: dim.trailing_zeros() as usize,
            matrix,
        })
    }

    /// Rebuild from an interleaved `[re, im, re, im, …]` row-major array
    pub fn from_flat(flat: &[f64], num_qubits: usize) -> Result<Self, EvolveError> {
        let dim = 1 << num_qubits;
        if flat.len() != dim * dim * 2 {
            return Err(EvolveError::DimensionMismatch {
                what: "flat density matrix",
                expected: dim * dim * 2,
                found: flat.len(),
            });
        }
        let matrix = DMatrix::from_fn(dim, dim, |i, j| {
            let idx = (i * dim + j) * 2;
            Complex::new(flat[idx], flat[idx + 1])
        });
        Ok(Self { matrix, num_qubits })
    }

    /// Interleaved `[re, im, …]` row-major array
    pub fn to_flat(&self) -> Vec<f64> {
        let dim = self.dim();
        let mut flat = Vec::with_capacity(dim * dim * 2);
        for i in 0..dim {
            for j in 0..dim {
                let c = self.matrix[(i, j)];
                flat.push(c.re);
                flat.push(c.im);
            }
        }
        flat
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<C64> {
        &self.matrix
    }

    pub(crate) fn matrix_mut(&mut self) -> &mut DMatrix<C64> {
        &mut self.matrix
    }

    pub fn into_matrix(self) -> DMatrix<C64> {
        self.matrix
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> C64 {
        self.matrix[(i, j)]
    }

    /// Real part of Tr(ρ)
    pub fn trace(&self) -> f64 {
        (0..self.dim()).map(|i| self.matrix[(i, i)].re).sum()
    }

    /// Tr(ρ²) = Σ |ρ_ij|² for Hermitian ρ
    pub fn purity(&self) -> f64 {
        self.matrix.iter().map(|c| c.norm_sqr()).sum()
    }

    pub fn is_finite(&self) -> bool {
        self.matrix
            .iter()
            .all(|c| c.re.is_finite() && c.im.is_finite())
    }

    /// max |ρ_ij − conj(ρ_ji)|
    pub fn hermiticity_residual(&self) -> f64 {
        let dim = self.dim();
        let mut worst: f64 = 0.0;
        for i in 0..dim {
            for j in i..dim {
                worst = worst.max((self.matrix[(i, j)] - self.matrix[(j, i)].conj()).norm());
            }
        }
        worst
    }

    /// Replace ρ by (ρ + ρ†)/2
    pub fn hermitize(&mut self) {
        let dim = self.dim();
        for i in 0..dim {
            let diag = self.matrix[(i, i)];
            self.matrix[(i, i)] = Complex::new(diag.re, 0.0);
            for j in (i + 1)..dim {
                let avg = (self.matrix[(i, j)] + self.matrix[(j, i)].conj()) * 0.5;
                self.matrix[(i, j)] = avg;
                self.matrix[(j, i)] = avg.conj();
            }
        }
    }

    /// Scale so that Tr(ρ) = 1. Returns the trace before scaling.
    ///
    /// A non-positive trace leaves the state untouched.
    pub fn renormalize(&mut self) -> f64 {
        let trace = self.trace();
        if trace > 0.0 && trace.is_finite() {
            let scale = 1.0 / trace;
            self.matrix.iter_mut().for_each(|c| *c *= scale);
        }
        trace
    }

    /// Smallest Hermitian eigenvalue
    pub fn min_eigenvalue(&self) -> Option<f64> {
        hermitian_eigenvalues(&self.matrix).and_then(|v| v.iter().copied().reduce(f64::min))
    }

    /// Clamp negative eigenvalues to zero and renormalise.
    ///
    /// Returns the most negative eigenvalue removed, 0.0 if the state was
    /// already positive semidefinite. If the eigen-solver does not converge
    /// the state is mixed with I/d just enough to lift the Gershgorin lower
    /// bound of the spectrum to zero.
    pub fn project_psd(&mut self) -> f64 {
        let dim = self.dim();
        let clamped = match SymmetricEigen::try_new(
            self.matrix.clone(),
            f64::EPSILON,
            EIGEN_MAX_ITERATIONS,
        ) {
            Some(mut eigen) => {
                let min = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
                if min < 0.0 {
                    eigen.eigenvalues.iter_mut().for_each(|l| *l = l.max(0.0));
                    self.matrix = eigen.recompose();
                    self.hermitize();
                    min
                } else {
                    0.0
                }
            }
            None => {
                log::warn!("eigen-decomposition did not converge (dim={dim}); mixing toward I/d");
                self.mix_to_gershgorin_floor()
            }
        };

        if clamped < 0.0 {
            self.renormalize();
        }
        clamped
    }

    /// ρ ← (1−α)ρ + α·Tr(ρ)·I/d with the smallest α that makes every
    /// Gershgorin disc non-negative. Returns the bound before mixing.
    fn mix_to_gershgorin_floor(&mut self) -> f64 {
        let dim = self.dim();
        let bound = (0..dim)
            .map(|i| {
                let radius: f64 = (0..dim)
                    .filter(|&j| j != i)
                    .map(|j| self.matrix[(i, j)].norm())
                    .sum();
                self.matrix[(i, i)].re - radius
            })
            .fold(f64::INFINITY, f64::min);
        if bound >= 0.0 {
            return 0.0;
        }

        let floor = self.trace() / dim as f64;
        let alpha = -bound / (floor - bound);
        self.matrix.iter_mut().for_each(|c| *c *= 1.0 - alpha);
        for i in 0..dim {
            self.matrix[(i, i)] += Complex::new(alpha * floor, 0.0);
        }
        bound
    }

    /// Probability that `qubit` reads `pole_bit`
    pub fn population(&self, qubit: usize, pole_bit: usize) -> f64 {
        diagonal_population(&self.matrix, qubit, pole_bit)
    }

    /// 2×2 reduced density matrix of one qubit (all others traced out)
    pub fn reduced_qubit(&self, qubit: usize) -> Matrix2<C64> {
        let mut reduced = Matrix2::from_element(ZERO);
        for i in 0..self.dim() {
            if bit(i, qubit) != 0 {
                continue;
            }
            let i1 = with_bit(i, qubit, 1);
            reduced[(0, 0)] += self.matrix[(i, i)];
            reduced[(0, 1)] += self.matrix[(i, i1)];
            reduced[(1, 0)] += self.matrix[(i1, i)];
            reduced[(1, 1)] += self.matrix[(i1, i1)];
        }
        reduced
    }

    /// 4×4 reduced density matrix of a qubit pair, basis |ab⟩ with `a` the high digit
    pub fn reduced_pair(&self, a: usize, b: usize) -> Matrix4<C64> {
        let mut reduced = Matrix4::from_element(ZERO);
        for rest in 0..self.dim() {
            if bit(rest, a) != 0 || bit(rest, b) != 0 {
                continue;
            }
            for row in 0..4 {
                let i = with_bit(with_bit(rest, a, row >> 1), b, row & 1);
                for col in 0..4 {
                    let j = with_bit(with_bit(rest, a, col >> 1), b, col & 1);
                    reduced[(row, col)] += self.matrix[(i, j)];
                }
            }
        }
        reduced
    }

    /// ρ' = Tr_q(ρ) ⊗ |φ⟩⟨φ|_q
    pub fn replace_qubit(&mut self, qubit: usize, phi: [C64; 2]) {
        let dim = self.dim();
        let old = &self.matrix;
        let next = DMatrix::from_fn(dim, dim, |i, j| {
            let traced = old[(with_bit(i, qubit, 0), with_bit(j, qubit, 0))]
                + old[(with_bit(i, qubit, 1), with_bit(j, qubit, 1))];
            traced * phi[bit(i, qubit)] * phi[bit(j, qubit)].conj()
        });
        self.matrix = next;
    }

    /// ρ' = Tr_ab(ρ) ⊗ |ψ⟩⟨ψ|_ab, ψ indexed as |ab⟩ with `a` the high digit
    pub fn replace_pair(&mut self, a: usize, b: usize, psi: [C64; 4]) {
        let dim = self.dim();
        let old = &self.matrix;
        let pair = |index: usize| (bit(index, a) << 1) | bit(index, b);
        let set = |index: usize, k: usize| with_bit(with_bit(index, a, k >> 1), b, k & 1);

        let next = DMatrix::from_fn(dim, dim, |i, j| {
            let traced: C64 = (0..4).map(|k| old[(set(i, k), set(j, k))]).sum();
            traced * psi[pair(i)] * psi[pair(j)].conj()
        });
        self.matrix = next;
    }

    /// Apply a qubit-diagonal Kraus operator diag(k0, k1) without renormalising
    pub fn apply_diagonal_kraus(&mut self, qubit: usize, k: [C64; 2]) {
        let dim = self.dim();
        for i in 0..dim {
            let ki = k[bit(i, qubit)];
            for j in 0..dim {
                let kj = k[bit(j, qubit)];
                self.matrix[(i, j)] = ki * self.matrix[(i, j)] * kj.conj();
            }
        }
    }

    /// Append a qubit in its north pole: ρ ⊗ |0⟩⟨0|, new qubit gets the next index
    pub fn extend_with_ground(&mut self) {
        let dim = self.dim();
        let mut next = DMatrix::from_element(dim * 2, dim * 2, ZERO);
        next.view_mut((0, 0), (dim, dim)).copy_from(&self.matrix);
        self.matrix = next;
        self.num_qubits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn plus() -> [C64; 2] {
        [Complex::new(FRAC_1_SQRT_2, 0.0), Complex::new(FRAC_1_SQRT_2, 0.0)]
    }

    #[test]
    fn test_ground_state_is_pure() {
        let rho = DensityMatrix::ground(3);
        assert_eq!(rho.dim(), 8);
        assert!((rho.trace() - 1.0).abs() < 1e-12);
        assert!((rho.purity() - 1.0).abs() < 1e-12);
        assert!((rho.population(2, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_product_state_reduced_matches_input() {
        let rho = DensityMatrix::product(&[[ONE, ZERO], plus()]);
        let r1 = rho.reduced_qubit(1);
        assert!((r1[(0, 1)].re - 0.5).abs() < 1e-12);
        let r0 = rho.reduced_qubit(0);
        assert!((r0[(0, 0)].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_round_trip_preserves_state() {
        let rho = DensityMatrix::product(&[plus(), plus()]);
        let restored = DensityMatrix::from_flat(&rho.to_flat(), 2).unwrap();
        assert_eq!(rho, restored);
        assert!(DensityMatrix::from_flat(&[1.0, 0.0], 2).is_err());
    }

    #[test]
    fn test_project_psd_removes_negative_eigenvalue() {
        let mut m = DMatrix::from_element(2, 2, ZERO);
        m[(0, 0)] = Complex::new(1.1, 0.0);
        m[(1, 1)] = Complex::new(-0.1, 0.0);
        let mut rho = DensityMatrix::from_matrix(m).unwrap();

        let clamped = rho.project_psd();
        assert!((clamped + 0.1).abs() < 1e-12);
        assert!((rho.trace() - 1.0).abs() < 1e-12);
        assert!(rho.min_eigenvalue().unwrap() >= -1e-12);
    }

    #[test]
    fn test_project_psd_on_large_register() {
        // Positive diagonal, but the leading 2×2 block has eigenvalue −0.1
        let dim = 1 << 7;
        let mut m = DMatrix::from_element(dim, dim, ZERO);
        m[(0, 0)] = Complex::new(0.5, 0.0);
        m[(1, 1)] = Complex::new(0.5, 0.0);
        m[(0, 1)] = Complex::new(0.6, 0.0);
        m[(1, 0)] = Complex::new(0.6, 0.0);
        let mut rho = DensityMatrix::from_matrix(m).unwrap();

        let clamped = rho.project_psd();
        assert!((clamped + 0.1).abs() < 1e-9);
        assert!((rho.trace() - 1.0).abs() < 1e-12);
        assert!(rho.min_eigenvalue().unwrap() >= -1e-9);
    }

    #[test]
    fn test_replace_pair_keeps_other_marginals() {
        let mut rho = DensityMatrix::product(&[plus(), [ONE, ZERO], [ZERO, ONE]]);
        let before = rho.reduced_qubit(0);
        let h = Complex::new(FRAC_1_SQRT_2, 0.0);
        rho.replace_pair(1, 2, [h, ZERO, ZERO, h]);
        let after = rho.reduced_qubit(0);
        assert!((before - after).norm() < 1e-12);
        assert!((rho.trace() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_extend_with_ground_adds_north_qubit() {
        let mut rho = DensityMatrix::product(&[plus()]);
        rho.extend_with_ground();
        assert_eq!(rho.num_qubits(), 2);
        assert!((rho.population(1, 0) - 1.0).abs() < 1e-12);
        assert!((rho.reduced_qubit(0)[(0, 1)].re - 0.5).abs() < 1e-12);
    }
}
