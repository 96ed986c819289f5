//! Per-emoji physics descriptors merged from factions
//!
//! Every faction contributes a partial [`Icon`] for each of its signature
//! emojis. Partials are folded by elementwise summation: couplings, energies
//! and rates add, drivers accumulate as separate terms, flags are or-ed.

use crate::error::ConfigError;
use crate::faction::{validate_rate, DriverSpec, Faction, GatedChannel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Icon {
    pub emoji: String,
    pub self_energy: f64,
    /// Coherent couplings declared from this emoji
    pub hamiltonian: BTreeMap<String, f64>,
    /// Rates of transitions leaving this emoji, keyed by target
    pub lindblad_outgoing: BTreeMap<String, f64>,
    /// Rates of transitions arriving at this emoji, keyed by source
    pub lindblad_incoming: BTreeMap<String, f64>,
    /// Gated transitions whose source is this emoji
    pub gated: Vec<GatedChannel>,
    pub drivers: Vec<DriverSpec>,
    pub is_adaptive: bool,
    pub is_eternal: bool,
    /// Names of the factions that contributed, in merge order
    pub factions: Vec<String>,
}

impl Icon {
    pub fn new(emoji: &str) -> Self {
        Self {
            emoji: emoji.to_string(),
            ..Default::default()
        }
    }

    pub fn is_driver(&self) -> bool {
        !self.drivers.is_empty()
    }

    /// This faction's contribution to one of its signature emojis
    fn partial(faction: &Faction, emoji: &str) -> Self {
        let row = |table: &BTreeMap<String, BTreeMap<String, f64>>| {
            table.get(emoji).cloned().unwrap_or_default()
        };

        Self {
            emoji: emoji.to_string(),
            self_energy: faction.self_energies.get(emoji).copied().unwrap_or(0.0),
            hamiltonian: row(&faction.hamiltonian),
            lindblad_outgoing: row(&faction.lindblad_outgoing),
            lindblad_incoming: row(&faction.lindblad_incoming),
            gated: faction
                .gated_lindblad
                .iter()
                .filter(|g| g.source == emoji)
                .cloned()
                .collect(),
            drivers: faction.drivers.get(emoji).copied().into_iter().collect(),
            is_adaptive: faction.adaptive.iter().any(|e| e == emoji),
            is_eternal: faction.eternal.iter().any(|e| e == emoji),
            factions: vec![faction.name.clone()],
        }
    }

    /// Fold another partial for the same emoji into this one
    fn absorb(mut self, other: Icon) -> Self {
        debug_assert_eq!(self.emoji, other.emoji);
        self.self_energy += other.self_energy;
        sum_into(&mut self.hamiltonian, other.hamiltonian);
        sum_into(&mut self.lindblad_outgoing, other.lindblad_outgoing);
        sum_into(&mut self.lindblad_incoming, other.lindblad_incoming);

        for gated in other.gated {
            match self.gated.iter_mut().find(|g| same_gate_key(g, &gated)) {
                Some(existing) => existing.rate += gated.rate,
                None => self.gated.push(gated),
            }
        }

        self.drivers.extend(other.drivers);
        self.is_adaptive |= other.is_adaptive;
        self.is_eternal |= other.is_eternal;
        self.factions.extend(other.factions);
        self
    }

    /// Apply a tuning patch. Entries in the patch replace existing ones.
    pub fn apply_tuning(&mut self, tuning: &IconTuning) -> Result<(), ConfigError> {
        if let Some(energy) = tuning.self_energy {
            if !energy.is_finite() {
                return Err(ConfigError::NonFinite(format!("self-energy of {}", self.emoji)));
            }
            self.self_energy = energy;
        }
        for (target, j) in &tuning.hamiltonian {
            if !j.is_finite() {
                return Err(ConfigError::NonFinite(format!("coupling {} -> {}", self.emoji, target)));
            }
        }
        for (target, rate) in &tuning.lindblad_outgoing {
            validate_rate(&self.emoji, target, *rate)?;
        }

        self.hamiltonian
            .extend(tuning.hamiltonian.iter().map(|(k, v)| (k.clone(), *v)));
        self.lindblad_outgoing
            .extend(tuning.lindblad_outgoing.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }
}

fn sum_into(acc: &mut BTreeMap<String, f64>, other: BTreeMap<String, f64>) {
    for (key, value) in other {
        *acc.entry(key).or_insert(0.0) += value;
    }
}

fn same_gate_key(a: &GatedChannel, b: &GatedChannel) -> bool {
    a.source == b.source
        && a.target == b.target
        && a.gate == b.gate
        && a.inverse == b.inverse
        && a.threshold.to_bits() == b.threshold.to_bits()
}

/// Runtime changes to an adaptive icon
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IconTuning {
    pub self_energy: Option<f64>,
    pub hamiltonian: BTreeMap<String, f64>,
    pub lindblad_outgoing: BTreeMap<String, f64>,
}

/// Merged icons in order of first appearance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IconSet {
    icons: Vec<Icon>,
    index: HashMap<String, usize>,
}

impl IconSet {
    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }

    pub fn get(&self, emoji: &str) -> Option<&Icon> {
        self.index.get(emoji).map(|&i| &self.icons[i])
    }

    pub fn get_mut(&mut self, emoji: &str) -> Option<&mut Icon> {
        self.index.get(emoji).map(|&i| &mut self.icons[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Icon> {
        self.icons.iter()
    }

    pub fn emojis(&self) -> impl Iterator<Item = &str> {
        self.icons.iter().map(|icon| icon.emoji.as_str())
    }

    pub fn has_adaptive(&self) -> bool {
        self.icons.iter().any(|icon| icon.is_adaptive)
    }

    /// Total rate of every ungated transition: outgoing declarations on the
    /// source plus incoming declarations on the target. Sorted by (source, target).
    pub fn transitions(&self) -> Vec<(String, String, f64)> {
        let mut totals: BTreeMap<(String, String), f64> = BTreeMap::new();
        for icon in &self.icons {
            for (target, rate) in &icon.lindblad_outgoing {
                *totals.entry((icon.emoji.clone(), target.clone())).or_insert(0.0) += rate;
            }
            for (source, rate) in &icon.lindblad_incoming {
                *totals.entry((source.clone(), icon.emoji.clone())).or_insert(0.0) += rate;
            }
        }
        totals.into_iter().map(|((s, t), r)| (s, t, r)).collect()
    }

    fn absorb(&mut self, partial: Icon) {
        match self.index.get(&partial.emoji) {
            Some(&i) => {
                let existing = std::mem::take(&mut self.icons[i]);
                self.icons[i] = existing.absorb(partial);
            }
            None => {
                self.index.insert(partial.emoji.clone(), self.icons.len());
                self.icons.push(partial);
            }
        }
    }
}

/// Merge factions into one icon per distinct signature emoji.
///
/// Every faction is validated first; nothing is merged if any of them fails.
pub fn merge_factions(factions: &[Faction]) -> Result<IconSet, ConfigError> {
    for faction in factions {
        faction.validate()?;
    }

    let set = factions
        .iter()
        .flat_map(|faction| {
            faction
                .signature
                .iter()
                .map(move |emoji| Icon::partial(faction, emoji))
        })
        .fold(IconSet::default(), |mut set, partial| {
            set.absorb(partial);
            set
        });

    log::debug!(
        "merged {} factions into {} icons",
        factions.len(),
        set.len()
    );
    Ok(set)
}
