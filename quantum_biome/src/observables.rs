//! Read-only quantities derived from ρ
//!
//! Entropies are in bits. Pairwise arrays follow the upper-triangular order
//! `[01, 02, …, 0n, 12, …]` shared with the layout engine.

use crate::density::{eigenvalues4, hermitian_eigenvalues, DensityMatrix};
use crate::hamiltonian::Hamiltonian;
use crate::lindblad::ChannelSet;
use crate::operator::{bit, C64};
use crate::register::RegisterMap;
use force_graph::{pair_count, BLOCH_STRIDE};
use nalgebra::{Matrix2, Normed};
use serde::{Deserialize, Serialize};

/// Eigenvalues below this contribute nothing to an entropy
const ENTROPY_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyMode {
    /// −Tr ρ log₂ ρ
    #[default]
    VonNeumann,
    /// 1 − Tr ρ²
    Linear,
}

pub fn purity(rho: &DensityMatrix) -> f64 {
    rho.purity()
}

/// −Σ λ log₂ λ over a spectrum
pub fn shannon_bits(eigenvalues: impl IntoIterator<Item = f64>) -> f64 {
    eigenvalues
        .into_iter()
        .filter(|&l| l > ENTROPY_FLOOR)
        .map(|l| -l * l.log2())
        .sum()
}

pub fn von_neumann_entropy(rho: &DensityMatrix) -> f64 {
    match hermitian_eigenvalues(rho.matrix()) {
        Some(values) => shannon_bits(values.iter().copied()),
        None => {
            log::warn!("entropy eigen-decomposition failed (dim={}); using linear entropy", rho.dim());
            1.0 - rho.purity()
        }
    }
}

pub fn entropy(rho: &DensityMatrix, mode: EntropyMode) -> f64 {
    match mode {
        EntropyMode::VonNeumann => von_neumann_entropy(rho),
        EntropyMode::Linear => 1.0 - rho.purity(),
    }
}

/// Bloch vector of a single-qubit reduced state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BlochVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BlochVector {
    pub fn from_reduced(m: &Matrix2<C64>) -> Self {
        Self {
            x: 2.0 * m[(0, 1)].re,
            y: -2.0 * m[(0, 1)].im,
            z: m[(0, 0)].re - m[(1, 1)].re,
        }
    }

    pub fn radius(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Polar angle from the north pole
    pub fn theta(&self) -> f64 {
        let r = self.radius();
        if r < ENTROPY_FLOOR {
            0.0
        } else {
            (self.z / r).clamp(-1.0, 1.0).acos()
        }
    }

    /// Azimuthal angle, the relative phase between the poles
    pub fn phi(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Entropy of the qubit: eigenvalues (1 ± r)/2
    pub fn entropy_bits(&self) -> f64 {
        let r = self.radius().min(1.0);
        shannon_bits([(1.0 + r) / 2.0, (1.0 - r) / 2.0])
    }
}

pub fn bloch_vector(rho: &DensityMatrix, qubit: usize) -> BlochVector {
    BlochVector::from_reduced(&rho.reduced_qubit(qubit))
}

/// Von Neumann entropy of one qubit's marginal
pub fn qubit_entropy(rho: &DensityMatrix, qubit: usize) -> f64 {
    bloch_vector(rho, qubit).entropy_bits()
}

/// Per qubit `[p0, p1, x, y, z, r, θ, φ]`
pub fn bloch_packet(rho: &DensityMatrix) -> Vec<f64> {
    let mut packet = Vec::with_capacity(rho.num_qubits() * BLOCH_STRIDE);
    for q in 0..rho.num_qubits() {
        let reduced = rho.reduced_qubit(q);
        let b = BlochVector::from_reduced(&reduced);
        packet.extend_from_slice(&[
            reduced[(0, 0)].re,
            reduced[(1, 1)].re,
            b.x,
            b.y,
            b.z,
            b.radius(),
            b.theta(),
            b.phi(),
        ]);
    }
    packet
}

/// Entropy of a two-qubit marginal
pub fn pair_entropy(rho: &DensityMatrix, a: usize, b: usize) -> Option<f64> {
    eigenvalues4(&rho.reduced_pair(a, b)).map(shannon_bits)
}

/// I(a:b) = S(a) + S(b) − S(ab), never negative
pub fn mutual_information(rho: &DensityMatrix, a: usize, b: usize) -> f64 {
    let Some(joint) = pair_entropy(rho, a, b) else {
        log::warn!("pair eigen-decomposition failed for qubits {a}, {b}");
        return 0.0;
    };
    (qubit_entropy(rho, a) + qubit_entropy(rho, b) - joint).max(0.0)
}

pub fn all_mutual_information(rho: &DensityMatrix) -> Vec<f64> {
    let n = rho.num_qubits();
    let singles: Vec<f64> = (0..n).map(|q| qubit_entropy(rho, q)).collect();
    let mut values = Vec::with_capacity(pair_count(n));
    for a in 0..n {
        for b in (a + 1)..n {
            let mi = pair_entropy(rho, a, b)
                .map(|joint| (singles[a] + singles[b] - joint).max(0.0))
                .unwrap_or(0.0);
            values.push(mi);
        }
    }
    values
}

/// Connected correlation ⟨Z_a Z_b⟩ − ⟨Z_a⟩⟨Z_b⟩
pub fn zz_correlation(rho: &DensityMatrix, a: usize, b: usize) -> f64 {
    let sign = |index: usize, q: usize| if bit(index, q) == 0 { 1.0 } else { -1.0 };
    let (mut zz, mut za, mut zb) = (0.0, 0.0, 0.0);
    for i in 0..rho.dim() {
        let p = rho.get(i, i).re;
        za += sign(i, a) * p;
        zb += sign(i, b) * p;
        zz += sign(i, a) * sign(i, b) * p;
    }
    zz - za * zb
}

pub fn all_zz_correlations(rho: &DensityMatrix) -> Vec<f64> {
    let n = rho.num_qubits();
    let mut values = Vec::with_capacity(pair_count(n));
    for a in 0..n {
        for b in (a + 1)..n {
            values.push(zz_correlation(rho, a, b));
        }
    }
    values
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QubitAxisView {
    pub qubit: usize,
    pub north_emoji: String,
    /// `None` for a vacuum pole
    pub south_emoji: Option<String>,
    pub p_north: f64,
    pub p_south: f64,
    /// |ρ₀₁| of the reduced qubit
    pub coherence_mag: f64,
    /// p_north − p_south
    pub balance: f64,
    pub bloch: BlochVector,
    pub radius: f64,
    pub theta: f64,
    pub phi: f64,
    pub entropy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingView {
    pub a: String,
    pub b: String,
    #[serde(rename = "J")]
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Lindblad,
    Gated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelView {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub source: String,
    pub target: String,
    pub rate: f64,
    /// Rate after the gate factor at the current state
    pub effective_rate: f64,
    pub gate: Option<String>,
}

/// Everything the UI reads about one biome, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableSnapshot {
    pub tick: u64,
    pub time: f64,
    pub num_qubits: usize,
    pub dimension: usize,
    pub purity: f64,
    pub entropy: f64,
    pub entropy_mode: EntropyMode,
    pub qubit_axes: Vec<QubitAxisView>,
    pub bloch_packet: Vec<f64>,
    pub mutual_information: Vec<f64>,
    pub correlations: Vec<f64>,
    pub hamiltonian_couplings: Vec<CouplingView>,
    pub lindblad_channels: Vec<ChannelView>,
}

impl ObservableSnapshot {
    pub fn extract(
        rho: &DensityMatrix,
        register: &RegisterMap,
        hamiltonian: &Hamiltonian,
        channels: &ChannelSet,
        mode: EntropyMode,
        tick: u64,
        time: f64,
    ) -> Self {
        let packet = bloch_packet(rho);
        let qubit_axes = register
            .axes()
            .iter()
            .enumerate()
            .map(|(q, axis)| {
                let record = &packet[q * BLOCH_STRIDE..(q + 1) * BLOCH_STRIDE];
                let bloch = BlochVector {
                    x: record[2],
                    y: record[3],
                    z: record[4],
                };
                QubitAxisView {
                    qubit: q,
                    north_emoji: axis.north.clone(),
                    south_emoji: axis.south.clone(),
                    p_north: record[0],
                    p_south: record[1],
                    coherence_mag: rho.reduced_qubit(q)[(0, 1)].norm(),
                    balance: record[0] - record[1],
                    bloch,
                    radius: record[5],
                    theta: record[6],
                    phi: record[7],
                    entropy: bloch.entropy_bits(),
                }
            })
            .collect();

        let couplings = hamiltonian
            .couplings()
            .iter()
            .map(|c| CouplingView {
                a: c.a.clone(),
                b: c.b.clone(),
                strength: c.strength,
            })
            .collect();

        let rates = channels.effective_rates(rho.matrix());
        let channel_views = channels
            .channels()
            .zip(rates)
            .map(|(c, effective_rate)| ChannelView {
                description: match &c.gate {
                    Some(g) if g.inverse => {
                        format!("{} → {} unless {}", c.source, c.target, g.emoji)
                    }
                    Some(g) => format!("{} → {} while {}", c.source, c.target, g.emoji),
                    None => format!("{} → {}", c.source, c.target),
                },
                kind: if c.gate.is_some() {
                    ChannelKind::Gated
                } else {
                    ChannelKind::Lindblad
                },
                source: c.source.clone(),
                target: c.target.clone(),
                rate: c.rate,
                effective_rate,
                gate: c.gate.as_ref().map(|g| g.emoji.clone()),
            })
            .collect();

        Self {
            tick,
            time,
            num_qubits: rho.num_qubits(),
            dimension: rho.dim(),
            purity: rho.purity(),
            entropy: entropy(rho, mode),
            entropy_mode: mode,
            qubit_axes,
            bloch_packet: packet,
            mutual_information: all_mutual_information(rho),
            correlations: all_zz_correlations(rho),
            hamiltonian_couplings: couplings,
            lindblad_channels: channel_views,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{ONE, ZERO};
    use force_graph::pair_index;
    use nalgebra::Complex;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn bell() -> DensityMatrix {
        let h = Complex::new(FRAC_1_SQRT_2, 0.0);
        DensityMatrix::from_pure(&[h, ZERO, ZERO, h])
    }

    #[test]
    fn test_pure_product_has_unit_purity_and_zero_entropy() {
        let plus = [Complex::new(FRAC_1_SQRT_2, 0.0); 2];
        let rho = DensityMatrix::product(&[plus, [ONE, ZERO]]);
        assert!((purity(&rho) - 1.0).abs() < 1e-12);
        assert!(von_neumann_entropy(&rho).abs() < 1e-9);
        assert!(entropy(&rho, EntropyMode::Linear).abs() < 1e-12);
    }

    #[test]
    fn test_bell_pair_has_two_bits_of_mutual_information() {
        let rho = bell();
        assert!((qubit_entropy(&rho, 0) - 1.0).abs() < 1e-9);
        assert!((mutual_information(&rho, 0, 1) - 2.0).abs() < 1e-9);
        assert!((zz_correlation(&rho, 0, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bloch_packet_layout() {
        // |+i⟩ on the equator: y = +1, φ = π/2
        let i_amp = Complex::new(0.0, FRAC_1_SQRT_2);
        let rho = DensityMatrix::product(&[[Complex::new(FRAC_1_SQRT_2, 0.0), i_amp]]);
        let packet = bloch_packet(&rho);
        assert_eq!(packet.len(), BLOCH_STRIDE);
        assert!((packet[0] - 0.5).abs() < 1e-12);
        assert!((packet[3] - 1.0).abs() < 1e-12);
        assert!((packet[5] - 1.0).abs() < 1e-12);
        assert!((packet[6] - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!((packet[7] - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_pairwise_arrays_follow_shared_index() {
        let mut rho = DensityMatrix::ground(3);
        rho.replace_pair(0, 2, {
            let h = Complex::new(FRAC_1_SQRT_2, 0.0);
            [h, ZERO, ZERO, h]
        });
        let mi = all_mutual_information(&rho);
        assert_eq!(mi.len(), 3);
        let entangled = pair_index(0, 2, 3).unwrap();
        for (k, value) in mi.iter().enumerate() {
            if k == entangled {
                assert!((value - 2.0).abs() < 1e-9);
            } else {
                assert!(value.abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_maximally_mixed_purity_is_one_over_dim() {
        let dim = 4;
        let mut m = nalgebra::DMatrix::from_element(dim, dim, ZERO);
        for i in 0..dim {
            m[(i, i)] = Complex::new(0.25, 0.0);
        }
        let rho = DensityMatrix::from_matrix(m).unwrap();
        assert!((purity(&rho) - 0.25).abs() < 1e-12);
        assert!((von_neumann_entropy(&rho) - 2.0).abs() < 1e-9);
    }
}
