use crate::PokemonType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BattleMode {
    Ai,
    Pvp,
}

impl BattleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BattleMode::Ai => "ai",
            BattleMode::Pvp => "pvp",
        }
    }
}

impl fmt::Display for BattleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a battle. `Active` is the only non-terminal value and a
/// battle never returns to it once it has left.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Active,
    Player1Won,
    Player2Won,
    Draw,
    Abandoned,
}

impl BattleStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BattleStatus::Active)
    }

    pub fn winner(&self) -> Option<Side> {
        match self {
            BattleStatus::Player1Won => Some(Side::Player1),
            BattleStatus::Player2Won => Some(Side::Player2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BattleStatus::Active => "active",
            BattleStatus::Player1Won => "player1_won",
            BattleStatus::Player2Won => "player2_won",
            BattleStatus::Draw => "draw",
            BattleStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<BattleStatus> {
        match value {
            "active" => Some(BattleStatus::Active),
            "player1_won" => Some(BattleStatus::Player1Won),
            "player2_won" => Some(BattleStatus::Player2Won),
            "draw" => Some(BattleStatus::Draw),
            "abandoned" => Some(BattleStatus::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for BattleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the two seats in a battle. In AI mode the human always sits in
/// `Player1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Player1,
    Player2,
}

impl Side {
    pub fn index(&self) -> usize {
        match self {
            Side::Player1 => 0,
            Side::Player2 => 1,
        }
    }

    pub fn opponent(&self) -> Side {
        match self {
            Side::Player1 => Side::Player2,
            Side::Player2 => Side::Player1,
        }
    }

    /// The terminal status reached when this side wins.
    pub fn won_status(&self) -> BattleStatus {
        match self {
            Side::Player1 => BattleStatus::Player1Won,
            Side::Player2 => BattleStatus::Player2Won,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Player1 => "player1",
            Side::Player2 => "player2",
        }
    }

    pub fn parse(value: &str) -> Option<Side> {
        match value {
            "player1" => Some(Side::Player1),
            "player2" => Some(Side::Player2),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A selectable attack with fixed power. Ids are unique within one
/// combatant's list only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attack {
    pub id: u8,
    pub name: String,
    pub power: u16,
    #[serde(rename = "type")]
    pub move_type: PokemonType,
}
