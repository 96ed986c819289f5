//! Emoji to qubit assignment
//!
//! A biome register is append-only. Once an emoji owns a (qubit, pole) mode it
//! keeps it for the lifetime of the biome, so every index cached elsewhere
//! stays valid as the register grows.

use crate::error::RegisterError;
use common::constants::HARD_QUBIT_CAP;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One end of a qubit axis. North is basis bit 0, south is bit 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pole {
    North,
    South,
}

impl Pole {
    #[inline]
    pub fn bit(self) -> usize {
        match self {
            Pole::North => 0,
            Pole::South => 1,
        }
    }

    pub fn from_bit(bit: usize) -> Self {
        if bit == 0 {
            Pole::North
        } else {
            Pole::South
        }
    }

    /// Sign of the Z eigenvalue: +1 north, −1 south
    pub fn sign(self) -> f64 {
        match self {
            Pole::North => 1.0,
            Pole::South => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Pole::North => Pole::South,
            Pole::South => Pole::North,
        }
    }
}

/// Where an emoji lives in the register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub qubit: usize,
    pub pole: Pole,
}

/// The emojis on both ends of one qubit. A missing south pole is vacuum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QubitAxis {
    pub north: String,
    pub south: Option<String>,
}

impl QubitAxis {
    pub fn emoji(&self, pole: Pole) -> Option<&str> {
        match pole {
            Pole::North => Some(self.north.as_str()),
            Pole::South => self.south.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    cap: usize,
    axes: Vec<QubitAxis>,
    modes: HashMap<String, Mode>,
}

impl RegisterMap {
    pub fn new(cap: usize) -> Result<Self, RegisterError> {
        if cap == 0 {
            return Err(RegisterError::ZeroCap);
        }
        if cap > HARD_QUBIT_CAP {
            return Err(RegisterError::CapAboveHardLimit {
                requested: cap,
                limit: HARD_QUBIT_CAP,
            });
        }
        Ok(Self {
            cap,
            axes: Vec::new(),
            modes: HashMap::new(),
        })
    }

    /// Rebuild a register from its axes, qubit 0 first
    pub fn from_axes(cap: usize, axes: Vec<QubitAxis>) -> Result<Self, RegisterError> {
        let mut register = Self::new(cap)?;
        for axis in axes {
            match &axis.south {
                Some(south) => register.assign_axis(&axis.north, south)?,
                None => register.assign(&axis.north)?,
            };
        }
        Ok(register)
    }

    /// Qubit of `emoji`, allocating the north pole of a new qubit if unseen
    pub fn assign(&mut self, emoji: &str) -> Result<usize, RegisterError> {
        if let Some(mode) = self.modes.get(emoji) {
            return Ok(mode.qubit);
        }
        let qubit = self.allocate(emoji)?;
        self.axes.push(QubitAxis {
            north: emoji.to_string(),
            south: None,
        });
        self.modes.insert(
            emoji.to_string(),
            Mode {
                qubit,
                pole: Pole::North,
            },
        );
        Ok(qubit)
    }

    /// Put `north` and `south` on the two poles of one qubit.
    ///
    /// Repeating an existing axis returns its qubit. A lone north emoji gains
    /// `south` on its vacuum pole without changing its index.
    pub fn assign_axis(&mut self, north: &str, south: &str) -> Result<usize, RegisterError> {
        if north == south {
            return Err(RegisterError::DegenerateAxis(north.to_string()));
        }

        match (self.modes.get(north).copied(), self.modes.get(south).copied()) {
            (Some(n), Some(s)) if n.qubit == s.qubit && n.pole == Pole::North => Ok(n.qubit),
            (Some(n), None) if n.pole == Pole::North && self.axes[n.qubit].south.is_none() => {
                self.axes[n.qubit].south = Some(south.to_string());
                self.modes.insert(
                    south.to_string(),
                    Mode {
                        qubit: n.qubit,
                        pole: Pole::South,
                    },
                );
                Ok(n.qubit)
            }
            (Some(n), _) => Err(RegisterError::AlreadyBound {
                emoji: north.to_string(),
                qubit: n.qubit,
            }),
            (None, Some(s)) => Err(RegisterError::AlreadyBound {
                emoji: south.to_string(),
                qubit: s.qubit,
            }),
            (None, None) => {
                let qubit = self.allocate(north)?;
                self.axes.push(QubitAxis {
                    north: north.to_string(),
                    south: Some(south.to_string()),
                });
                self.modes.insert(
                    north.to_string(),
                    Mode {
                        qubit,
                        pole: Pole::North,
                    },
                );
                self.modes.insert(
                    south.to_string(),
                    Mode {
                        qubit,
                        pole: Pole::South,
                    },
                );
                Ok(qubit)
            }
        }
    }

    fn allocate(&self, emoji: &str) -> Result<usize, RegisterError> {
        if self.axes.len() >= self.cap {
            return Err(RegisterError::CapacityExceeded {
                emoji: emoji.to_string(),
                cap: self.cap,
            });
        }
        Ok(self.axes.len())
    }

    pub fn mode(&self, emoji: &str) -> Option<Mode> {
        self.modes.get(emoji).copied()
    }

    pub fn contains(&self, emoji: &str) -> bool {
        self.modes.contains_key(emoji)
    }

    pub fn axis(&self, qubit: usize) -> Option<&QubitAxis> {
        self.axes.get(qubit)
    }

    pub fn axes(&self) -> &[QubitAxis] {
        &self.axes
    }

    /// Emoji bound to a mode, if any
    pub fn emoji_at(&self, qubit: usize, pole: Pole) -> Option<&str> {
        self.axes.get(qubit).and_then(|axis| axis.emoji(pole))
    }

    pub fn qubit_count(&self) -> usize {
        self.axes.len()
    }

    /// Hilbert space dimension 2^n
    pub fn dimension(&self) -> usize {
        1 << self.axes.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Every bound emoji with its mode, ordered by qubit then pole
    pub fn entries(&self) -> Vec<(String, Mode)> {
        let mut entries: Vec<(String, Mode)> = self
            .modes
            .iter()
            .map(|(emoji, mode)| (emoji.clone(), *mode))
            .collect();
        entries.sort_by_key(|(_, mode)| (mode.qubit, mode.pole.bit()));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_idempotent_and_append_only() {
        let mut register = RegisterMap::new(4).unwrap();
        assert_eq!(register.assign("🌾").unwrap(), 0);
        assert_eq!(register.assign("🍂").unwrap(), 1);
        assert_eq!(register.assign("🌾").unwrap(), 0);
        assert_eq!(register.qubit_count(), 2);
        assert_eq!(register.dimension(), 4);
        assert_eq!(
            register.mode("🍂"),
            Some(Mode {
                qubit: 1,
                pole: Pole::North
            })
        );
    }

    #[test]
    fn test_capacity_exceeded_leaves_map_unchanged() {
        let mut register = RegisterMap::new(2).unwrap();
        register.assign("a").unwrap();
        register.assign("b").unwrap();
        let before = register.clone();

        assert_eq!(
            register.assign("c"),
            Err(RegisterError::CapacityExceeded {
                emoji: "c".into(),
                cap: 2
            })
        );
        assert_eq!(register, before);
    }

    #[test]
    fn test_cap_limits() {
        assert_eq!(RegisterMap::new(0), Err(RegisterError::ZeroCap));
        assert!(matches!(
            RegisterMap::new(17),
            Err(RegisterError::CapAboveHardLimit { .. })
        ));
        assert!(RegisterMap::new(16).is_ok());
    }

    #[test]
    fn test_assign_axis_binds_both_poles() {
        let mut register = RegisterMap::new(4).unwrap();
        let q = register.assign_axis("🌾", "🍂").unwrap();
        assert_eq!(q, 0);
        assert_eq!(register.mode("🍂").unwrap().pole, Pole::South);
        assert_eq!(register.assign_axis("🌾", "🍂").unwrap(), 0);
        assert_eq!(register.emoji_at(0, Pole::South), Some("🍂"));
        assert_eq!(
            register.assign_axis("🍂", "🌾"),
            Err(RegisterError::AlreadyBound {
                emoji: "🍂".into(),
                qubit: 0
            })
        );
    }

    #[test]
    fn test_assign_axis_fills_vacuum_pole() {
        let mut register = RegisterMap::new(4).unwrap();
        register.assign("☀").unwrap();
        register.assign("🌾").unwrap();
        assert_eq!(register.assign_axis("🌾", "🍂").unwrap(), 1);
        assert_eq!(register.qubit_count(), 2);
    }

    #[test]
    fn test_from_axes_restores_entries() {
        let mut register = RegisterMap::new(4).unwrap();
        register.assign_axis("🌾", "🍂").unwrap();
        register.assign("☀").unwrap();

        let restored = RegisterMap::from_axes(4, register.axes().to_vec()).unwrap();
        assert_eq!(restored.entries(), register.entries());
        assert_eq!(restored.entries()[1].0, "🍂");
    }
}
