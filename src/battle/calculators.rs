use crate::battle::state::TurnRng;
use schema::PokemonType;

/// Lowest and highest damage variation factor.
pub const VARIATION_MIN: f64 = 0.8;
pub const VARIATION_MAX: f64 = 1.2;
const VARIATION_SPAN: f64 = 0.4;

/// Outcome of a single damage calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageRoll {
    pub damage: u16,
    pub effectiveness: f64,
}

/// Calculate the damage one attack deals.
///
/// `base = (attack / defense) * power * effectiveness`, scaled by a uniform
/// variation in `[0.8, 1.2]` and floored. Any hit that is not an immunity
/// deals at least 1 damage. Immunities return 0 without consuming a random
/// draw.
pub fn calculate_damage(
    attack_stat: u16,
    defense_stat: u16,
    move_power: u16,
    move_type: PokemonType,
    defender_types: &[PokemonType],
    rng: &mut TurnRng,
) -> DamageRoll {
    let effectiveness = PokemonType::effectiveness_against(move_type, defender_types);
    if effectiveness == 0.0 {
        return DamageRoll {
            damage: 0,
            effectiveness,
        };
    }

    let defense = defense_stat.max(1) as f64;
    let base_damage = (attack_stat as f64 / defense) * move_power as f64 * effectiveness;
    let variation = VARIATION_MIN + rng.next_roll("damage variation") * VARIATION_SPAN;
    let damage = (base_damage * variation).floor().clamp(1.0, u16::MAX as f64) as u16;

    DamageRoll {
        damage,
        effectiveness,
    }
}

/// Player-facing line for an effectiveness multiplier; neutral hits are silent.
pub fn effectiveness_message(multiplier: f64) -> Option<&'static str> {
    match multiplier {
        m if m == 0.0 => Some("It had no effect!"),
        m if m > 1.0 => Some("It's super effective!"),
        m if m < 1.0 => Some("It's not very effective..."),
        _ => None,
    }
}
