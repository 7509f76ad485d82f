//! Raw records as served by the species data source (PokeAPI JSON shape).
//!
//! Every field is defaulted so partial payloads still deserialize; the
//! battle layer decides what a missing value means.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    #[serde(default)]
    pub name: String,
}

impl NamedResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    #[serde(default)]
    pub base_stat: u16,
    #[serde(default)]
    pub stat: NamedResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSlot {
    #[serde(default)]
    pub slot: u8,
    #[serde(rename = "type", default)]
    pub type_: NamedResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionGroupDetail {
    #[serde(default)]
    pub move_learn_method: NamedResource,
    #[serde(default)]
    pub level_learned_at: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveEntry {
    #[serde(rename = "move")]
    pub move_: NamedResource,
    #[serde(default)]
    pub version_group_details: Vec<VersionGroupDetail>,
}

impl MoveEntry {
    pub fn learned_by_level_up(&self) -> bool {
        self.version_group_details
            .iter()
            .any(|detail| detail.move_learn_method.name == "level-up")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stats: Vec<StatEntry>,
    #[serde(default)]
    pub types: Vec<TypeSlot>,
    #[serde(default)]
    pub moves: Vec<MoveEntry>,
}

impl SpeciesRecord {
    /// Base value of a named stat ("hp", "attack", ...), if present and non-zero.
    pub fn base_stat(&self, name: &str) -> Option<u16> {
        self.stats
            .iter()
            .find(|entry| entry.stat.name == name)
            .map(|entry| entry.base_stat)
            .filter(|value| *value > 0)
    }

    /// Type names ordered by slot.
    pub fn type_names(&self) -> Vec<&str> {
        let mut slots: Vec<&TypeSlot> = self.types.iter().collect();
        slots.sort_by_key(|slot| slot.slot);
        slots.iter().map(|slot| slot.type_.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub power: Option<u16>,
    #[serde(rename = "type", default)]
    pub type_: NamedResource,
    #[serde(default)]
    pub damage_class: Option<NamedResource>,
}

impl MoveRecord {
    /// A move usable as an attack: positive power and not a status move.
    pub fn is_damaging(&self) -> bool {
        let is_status = self
            .damage_class
            .as_ref()
            .map(|class| class.name == "status")
            .unwrap_or(false);
        matches!(self.power, Some(power) if power > 0) && !is_status
    }
}
