//! Coherent generator of a biome
//!
//! H(t) = Σ ε s Z_q + Σ J C_ab + Σ A cos(ωt + φ) X_q
//!
//! String-keyed icon tables are resolved once into sparse operators over the
//! register; the evolver only ever sees index-addressed triplets.

use crate::icon::IconSet;
use crate::operator::{SparseOperator, C64, PAULI_X, PAULI_Z};
use crate::register::{Mode, RegisterMap};
use nalgebra::{Complex, DMatrix};
use std::collections::BTreeMap;

/// Periodic drive on one qubit
#[derive(Debug, Clone, PartialEq)]
pub struct DriverTerm {
    pub emoji: String,
    pub qubit: usize,
    pub amplitude: f64,
    pub frequency: f64,
    pub phase: f64,
    operator: SparseOperator,
}

impl DriverTerm {
    #[inline]
    pub fn envelope(&self, t: f64) -> f64 {
        self.amplitude * (self.frequency * t + self.phase).cos()
    }
}

/// A resolved pairwise coupling
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingTerm {
    pub a: String,
    pub b: String,
    pub mode_a: Mode,
    pub mode_b: Mode,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hamiltonian {
    static_part: SparseOperator,
    drivers: Vec<DriverTerm>,
    couplings: Vec<CouplingTerm>,
}

impl Hamiltonian {
    /// H = 0 on a register of `num_qubits`
    pub fn zero(num_qubits: usize) -> Self {
        Self {
            static_part: SparseOperator::zero(1 << num_qubits),
            drivers: Vec::new(),
            couplings: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.static_part.dim()
    }

    pub fn static_part(&self) -> &SparseOperator {
        &self.static_part
    }

    pub fn drivers(&self) -> &[DriverTerm] {
        &self.drivers
    }

    pub fn couplings(&self) -> &[CouplingTerm] {
        &self.couplings
    }

    pub fn is_time_dependent(&self) -> bool {
        !self.drivers.is_empty()
    }

    /// Accumulate −i[H(t), ρ] into `out`
    pub fn accumulate_commutator(&self, rho: &DMatrix<C64>, t: f64, out: &mut DMatrix<C64>) {
        let minus_i = Complex::new(0.0, -1.0);
        let plus_i = Complex::new(0.0, 1.0);

        self.static_part.left_mul_into(rho, minus_i, out);
        self.static_part.right_mul_into(rho, plus_i, out);

        for driver in &self.drivers {
            let f = driver.envelope(t);
            if f == 0.0 {
                continue;
            }
            driver.operator.left_mul_into(rho, minus_i * f, out);
            driver.operator.right_mul_into(rho, plus_i * f, out);
        }
    }

    /// Dense H(t)
    pub fn dense_at(&self, t: f64) -> DMatrix<C64> {
        let mut h = self.static_part.to_dense();
        for driver in &self.drivers {
            let f = driver.envelope(t);
            for &(r, c, v) in driver.operator.entries() {
                h[(r, c)] += v * f;
            }
        }
        h
    }
}

/// Resolves icons against a register into a [`Hamiltonian`]
pub struct HamiltonianBuilder<'a> {
    register: &'a RegisterMap,
}

impl<'a> HamiltonianBuilder<'a> {
    pub fn new(register: &'a RegisterMap) -> Self {
        Self { register }
    }

    pub fn build(&self, icons: &IconSet) -> Hamiltonian {
        let n = self.register.qubit_count();
        let dim = self.register.dimension();
        let mut terms: Vec<SparseOperator> = Vec::new();

        // Self-energies: ε s Z_q
        for icon in icons.iter() {
            if icon.self_energy == 0.0 {
                continue;
            }
            if let Some(mode) = self.register.mode(&icon.emoji) {
                let z = SparseOperator::single_qubit(n, mode.qubit, &PAULI_Z);
                terms.push(z.scaled(icon.self_energy * mode.pole.sign()));
            }
        }

        let couplings = self.resolve_couplings(icons);
        for coupling in &couplings {
            let op = if coupling.mode_a.qubit == coupling.mode_b.qubit {
                SparseOperator::single_qubit(n, coupling.mode_a.qubit, &PAULI_X)
            } else {
                SparseOperator::two_qubit(
                    n,
                    coupling.mode_a.qubit,
                    &PAULI_X,
                    coupling.mode_b.qubit,
                    &PAULI_X,
                )
            };
            terms.push(op.scaled(coupling.strength));
        }

        let static_part = terms
            .iter()
            .fold(SparseOperator::zero(dim), |acc, term| acc.add(term));

        let mut drivers = Vec::new();
        for icon in icons.iter() {
            let Some(mode) = self.register.mode(&icon.emoji) else {
                continue;
            };
            for spec in &icon.drivers {
                drivers.push(DriverTerm {
                    emoji: icon.emoji.clone(),
                    qubit: mode.qubit,
                    amplitude: spec.amplitude,
                    frequency: spec.frequency,
                    phase: spec.phase,
                    operator: SparseOperator::single_qubit(n, mode.qubit, &PAULI_X),
                });
            }
        }

        log::debug!(
            "hamiltonian: dim={}, nnz={}, couplings={}, drivers={}",
            dim,
            static_part.nnz(),
            couplings.len(),
            drivers.len()
        );

        Hamiltonian {
            static_part,
            drivers,
            couplings,
        }
    }

    /// One term per unordered emoji pair. Both directions declared → mean.
    fn resolve_couplings(&self, icons: &IconSet) -> Vec<CouplingTerm> {
        // (lo, hi) -> (declared lo→hi, declared hi→lo)
        let mut pairs: BTreeMap<(String, String), (Option<f64>, Option<f64>)> = BTreeMap::new();

        for icon in icons.iter() {
            for (other, &j) in &icon.hamiltonian {
                if *other == icon.emoji {
                    continue;
                }
                let forward = icon.emoji < *other;
                let key = if forward {
                    (icon.emoji.clone(), other.clone())
                } else {
                    (other.clone(), icon.emoji.clone())
                };
                let slot = pairs.entry(key).or_insert((None, None));
                let target = if forward { &mut slot.0 } else { &mut slot.1 };
                *target = Some(target.unwrap_or(0.0) + j);
            }
        }

        pairs
            .into_iter()
            .filter_map(|((a, b), declared)| {
                let strength = match declared {
                    (Some(x), Some(y)) => 0.5 * (x + y),
                    (Some(x), None) | (None, Some(x)) => x,
                    (None, None) => return None,
                };
                match (self.register.mode(&a), self.register.mode(&b)) {
                    (Some(mode_a), Some(mode_b)) if strength != 0.0 => Some(CouplingTerm {
                        a,
                        b,
                        mode_a,
                        mode_b,
                        strength,
                    }),
                    (Some(_), Some(_)) => None,
                    _ => {
                        log::debug!("skipping coupling {a} <-> {b}: emoji not in register");
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faction::{DriverSpec, Faction};
    use crate::icon::merge_factions;

    fn register(emojis: &[&str]) -> RegisterMap {
        let mut register = RegisterMap::new(8).unwrap();
        for e in emojis {
            register.assign(e).unwrap();
        }
        register
    }

    #[test]
    fn test_self_energy_sign_follows_pole() {
        let icons = merge_factions(&[Faction::new("A", &["🌾", "🍂"])
            .with_self_energy("🌾", 0.5)
            .with_self_energy("🍂", 0.5)])
        .unwrap();
        let mut reg = RegisterMap::new(2).unwrap();
        reg.assign_axis("🌾", "🍂").unwrap();

        // +0.5 Z − 0.5 Z cancels
        let h = HamiltonianBuilder::new(&reg).build(&icons);
        assert!(h.static_part().is_empty());
    }

    #[test]
    fn test_bidirectional_coupling_uses_mean() {
        let icons = merge_factions(&[Faction::new("A", &["🌾", "☀"])
            .with_coupling("🌾", "☀", 0.2)
            .with_coupling("☀", "🌾", 0.4)])
        .unwrap();
        let reg = register(&["🌾", "☀"]);
        let h = HamiltonianBuilder::new(&reg).build(&icons);

        assert_eq!(h.couplings().len(), 1);
        assert!((h.couplings()[0].strength - 0.3).abs() < 1e-12);
        // X0 X1 connects |00⟩ and |11⟩
        let dense = h.dense_at(0.0);
        assert!((dense[(3, 0)].re - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_hamiltonian_is_hermitian() {
        let drive = DriverSpec {
            amplitude: 0.7,
            frequency: 2.0,
            phase: 0.3,
        };
        let icons = merge_factions(&[Faction::new("A", &["🌾", "☀", "💧"])
            .with_self_energy("🌾", 0.1)
            .with_coupling("🌾", "☀", 0.2)
            .with_coupling("💧", "🌾", -0.15)
            .with_driver("☀", drive)])
        .unwrap();
        let reg = register(&["🌾", "☀", "💧"]);
        let h = HamiltonianBuilder::new(&reg).build(&icons);

        assert!(h.is_time_dependent());
        for t in [0.0, 0.4, 1.3] {
            let dense = h.dense_at(t);
            assert!((&dense - dense.adjoint()).norm() < 1e-12);
        }
    }

    #[test]
    fn test_unregistered_coupling_skipped() {
        let icons = merge_factions(&[Faction::new("A", &["🌾", "🐺"]).with_coupling("🌾", "🐺", 0.2)])
            .unwrap();
        let reg = register(&["🌾"]);
        let h = HamiltonianBuilder::new(&reg).build(&icons);
        assert!(h.couplings().is_empty());
        assert_eq!(h.dim(), 2);
    }

    #[test]
    fn test_commutator_matches_dense() {
        let icons = merge_factions(&[Faction::new("A", &["🌾", "☀"])
            .with_self_energy("🌾", 0.4)
            .with_coupling("🌾", "☀", 0.25)])
        .unwrap();
        let reg = register(&["🌾", "☀"]);
        let h = HamiltonianBuilder::new(&reg).build(&icons);

        let rho = DMatrix::from_fn(4, 4, |i, j| Complex::new(0.1 * (i + j) as f64, 0.05 * i as f64));
        let mut out = DMatrix::from_element(4, 4, Complex::new(0.0, 0.0));
        h.accumulate_commutator(&rho, 0.0, &mut out);

        let dense = h.dense_at(0.0);
        let expected = (&dense * &rho - &rho * &dense) * Complex::new(0.0, -1.0);
        assert!((out - expected).norm() < 1e-12);
    }
}
