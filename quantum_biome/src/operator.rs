//! Sparse register operators
//!
//! Hamiltonian and Lindblad terms on a biome are tensor products of single-qubit
//! matrices with identities, so almost every entry is zero. They are kept as
//! sorted `(row, col, value)` triplets and applied directly to the dense ρ,
//! which costs O(nnz · d) per product instead of O(d³).

use nalgebra::{Complex, DMatrix, Normed};

/// Complex scalar used throughout the substrate
pub type C64 = Complex<f64>;

/// Entries with magnitude below this are dropped when building operators
const DROP_TOLERANCE: f64 = 1e-15;

pub const ZERO: C64 = Complex { re: 0.0, im: 0.0 };
pub const ONE: C64 = Complex { re: 1.0, im: 0.0 };

/// Row-major 2×2 single-qubit matrix `[[m00, m01], [m10, m11]]`
pub type Qubit2 = [[C64; 2]; 2];

/// Pauli X
pub const PAULI_X: Qubit2 = [[ZERO, ONE], [ONE, ZERO]];

/// Pauli Z
pub const PAULI_Z: Qubit2 = [[ONE, ZERO], [ZERO, Complex { re: -1.0, im: 0.0 }]];

/// |to⟩⟨from| on one qubit, poles given as bits
pub fn transition(from: usize, to: usize) -> Qubit2 {
    let mut m = [[ZERO; 2]; 2];
    m[to][from] = ONE;
    m
}

#[inline]
pub fn bit(index: usize, qubit: usize) -> usize {
    (index >> qubit) & 1
}

#[inline]
pub fn with_bit(index: usize, qubit: usize, value: usize) -> usize {
    (index & !(1 << qubit)) | (value << qubit)
}

/// Sparse square operator on a 2^n register
#[derive(Debug, Clone, PartialEq)]
pub struct SparseOperator {
    dim: usize,
    entries: Vec<(usize, usize, C64)>,
}

impl SparseOperator {
    pub fn zero(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
        }
    }

    /// Build from unsorted triplets; duplicates are summed and zeros dropped
    pub fn from_triplets(dim: usize, mut triplets: Vec<(usize, usize, C64)>) -> Self {
        triplets.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut entries: Vec<(usize, usize, C64)> = Vec::with_capacity(triplets.len());
        for (row, col, value) in triplets {
            match entries.last_mut() {
                Some(last) if last.0 == row && last.1 == col => last.2 += value,
                _ => entries.push((row, col, value)),
            }
        }
        entries.retain(|(_, _, v)| v.norm() > DROP_TOLERANCE);

        Self { dim, entries }
    }

    /// Embed a single-qubit matrix acting on `qubit` of an `num_qubits` register
    pub fn single_qubit(num_qubits: usize, qubit: usize, m: &Qubit2) -> Self {
        let dim = 1 << num_qubits;
        let mut triplets = Vec::with_capacity(dim * 2);

        for col in 0..dim {
            let s = bit(col, qubit);
            for r in 0..2 {
                let value = m[r][s];
                if value.norm() > DROP_TOLERANCE {
                    triplets.push((with_bit(col, qubit, r), col, value));
                }
            }
        }

        Self::from_triplets(dim, triplets)
    }

    /// Embed `ma ⊗ mb` acting on two distinct qubits
    pub fn two_qubit(num_qubits: usize, qa: usize, ma: &Qubit2, qb: usize, mb: &Qubit2) -> Self {
        debug_assert_ne!(qa, qb);
        let dim = 1 << num_qubits;
        let mut triplets = Vec::with_capacity(dim * 4);

        for col in 0..dim {
            let sa = bit(col, qa);
            let sb = bit(col, qb);
            for ra in 0..2 {
                for rb in 0..2 {
                    let value = ma[ra][sa] * mb[rb][sb];
                    if value.norm() > DROP_TOLERANCE {
                        let row = with_bit(with_bit(col, qa, ra), qb, rb);
                        triplets.push((row, col, value));
                    }
                }
            }
        }

        Self::from_triplets(dim, triplets)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(usize, usize, C64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|&(r, c, v)| (r, c, v * factor))
            .collect();
        Self::from_triplets(self.dim, entries)
    }

    pub fn add(&self, other: &SparseOperator) -> Self {
        debug_assert_eq!(self.dim, other.dim);
        let mut triplets = self.entries.clone();
        triplets.extend_from_slice(&other.entries);
        Self::from_triplets(self.dim, triplets)
    }

    pub fn adjoint(&self) -> Self {
        let triplets = self
            .entries
            .iter()
            .map(|&(r, c, v)| (c, r, v.conj()))
            .collect();
        Self::from_triplets(self.dim, triplets)
    }

    /// Sparse product `self · other`
    pub fn mul(&self, other: &SparseOperator) -> Self {
        debug_assert_eq!(self.dim, other.dim);

        // Row offsets into `other` (entries are sorted by row)
        let mut row_start = vec![0usize; self.dim + 1];
        for &(r, _, _) in &other.entries {
            row_start[r + 1] += 1;
        }
        for i in 0..self.dim {
            row_start[i + 1] += row_start[i];
        }

        let mut triplets = Vec::new();
        for &(i, k, a) in &self.entries {
            for &(_, j, b) in &other.entries[row_start[k]..row_start[k + 1]] {
                triplets.push((i, j, a * b));
            }
        }
        Self::from_triplets(self.dim, triplets)
    }

    /// Accumulate `scale · (self · rho)` into `out`
    pub fn left_mul_into(&self, rho: &DMatrix<C64>, scale: C64, out: &mut DMatrix<C64>) {
        let d = rho.ncols();
        for &(i, k, v) in &self.entries {
            let coeff = v * scale;
            for j in 0..d {
                out[(i, j)] += coeff * rho[(k, j)];
            }
        }
    }

    /// Accumulate `scale · (rho · self)` into `out`
    pub fn right_mul_into(&self, rho: &DMatrix<C64>, scale: C64, out: &mut DMatrix<C64>) {
        let d = rho.nrows();
        for &(k, j, v) in &self.entries {
            let coeff = v * scale;
            for i in 0..d {
                out[(i, j)] += rho[(i, k)] * coeff;
            }
        }
    }

    /// Accumulate `scale · (self · rho · self†)` into `out`
    pub fn sandwich_into(&self, rho: &DMatrix<C64>, scale: f64, out: &mut DMatrix<C64>) {
        for &(i, k, a) in &self.entries {
            let a = a * scale;
            for &(j, l, b) in &self.entries {
                out[(i, j)] += a * rho[(k, l)] * b.conj();
            }
        }
    }

    pub fn to_dense(&self) -> DMatrix<C64> {
        let mut m = DMatrix::from_element(self.dim, self.dim, ZERO);
        for &(r, c, v) in &self.entries {
            m[(r, c)] += v;
        }
        m
    }

    /// Largest |A_ij − conj(A_ji)|
    pub fn hermiticity_residual(&self) -> f64 {
        let dense = self.to_dense();
        let mut worst: f64 = 0.0;
        for i in 0..self.dim {
            for j in 0..self.dim {
                worst = worst.max((dense[(i, j)] - dense[(j, i)].conj()).norm());
            }
        }
        worst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_qubit_x_flips_bit() {
        let x1 = SparseOperator::single_qubit(2, 1, &PAULI_X);
        let dense = x1.to_dense();
        // |00⟩ ↔ |10⟩ (bit 1 set) and |01⟩ ↔ |11⟩
        assert_eq!(dense[(2, 0)], ONE);
        assert_eq!(dense[(0, 2)], ONE);
        assert_eq!(dense[(3, 1)], ONE);
        assert_eq!(x1.nnz(), 4);
    }

    #[test]
    fn test_two_qubit_xx_is_hermitian() {
        let xx = SparseOperator::two_qubit(3, 0, &PAULI_X, 2, &PAULI_X);
        assert_eq!(xx.nnz(), 8);
        assert!(xx.hermiticity_residual() < 1e-15);
    }

    #[test]
    fn test_duplicates_merge_and_cancel() {
        let op = SparseOperator::from_triplets(
            2,
            vec![(0, 1, ONE), (0, 1, ONE), (1, 0, ONE), (1, 0, -ONE)],
        );
        assert_eq!(op.nnz(), 1);
        assert_eq!(op.entries()[0], (0, 1, Complex::new(2.0, 0.0)));
    }

    #[test]
    fn test_transition_adjoint_product_is_projector() {
        let lower = SparseOperator::single_qubit(1, 0, &transition(0, 1));
        let n = lower.adjoint().mul(&lower).to_dense();
        assert_eq!(n[(0, 0)], ONE);
        assert_eq!(n[(1, 1)], ZERO);
    }

    #[test]
    fn test_products_match_dense() {
        let op = SparseOperator::two_qubit(2, 0, &transition(0, 1), 1, &PAULI_X);
        let rho = DMatrix::from_fn(4, 4, |i, j| Complex::new(i as f64 + 1.0, j as f64 - 0.5));
        let dense = op.to_dense();

        let mut left = DMatrix::from_element(4, 4, ZERO);
        op.left_mul_into(&rho, ONE, &mut left);
        assert!((left - &dense * &rho).norm() < 1e-12);

        let mut right = DMatrix::from_element(4, 4, ZERO);
        op.right_mul_into(&rho, ONE, &mut right);
        assert!((right - &rho * &dense).norm() < 1e-12);

        let mut sandwich = DMatrix::from_element(4, 4, ZERO);
        op.sandwich_into(&rho, 1.0, &mut sandwich);
        assert!((sandwich - &dense * &rho * dense.adjoint()).norm() < 1e-12);
    }
}
