//! A module for defining AI behaviors for battle opponents.

use crate::battle::state::{Battle, TurnRng};
use schema::Side;

/// A trait for any system that can decide on a battle action.
/// This provides a common interface for different AI difficulties or strategies.
pub trait Behavior: Send + Sync {
    /// Picks the attack id the given side uses next. `None` when the side has
    /// no attacks at all.
    fn choose_attack(&self, side: Side, battle: &Battle, rng: &mut TurnRng) -> Option<u8>;
}

/// Picks uniformly at random from the combatant's attack list.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomAI;

impl RandomAI {
    pub fn new() -> Self {
        Self
    }
}

impl Behavior for RandomAI {
    fn choose_attack(&self, side: Side, battle: &Battle, rng: &mut TurnRng) -> Option<u8> {
        let attacks = &battle.combatant(side).attacks;
        if attacks.is_empty() {
            return None;
        }
        let index = rng.choose_index(attacks.len(), "ai attack choice");
        Some(attacks[index].id)
    }
}

/// Always uses the strongest attack. The demo binary plays the human side
/// with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrongestAttackAI;

impl Behavior for StrongestAttackAI {
    fn choose_attack(&self, side: Side, battle: &Battle, _rng: &mut TurnRng) -> Option<u8> {
        battle
            .combatant(side)
            .attacks
            .iter()
            .max_by_key(|attack| attack.power)
            .map(|attack| attack.id)
    }
}
