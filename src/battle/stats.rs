//! Derivation of battle stats and attack lists from raw species records.

use crate::battle::state::StatBlock;
use schema::{Attack, MoveRecord, PokemonType, SpeciesRecord};

/// Every combatant fights at this level.
pub const BATTLE_LEVEL: u16 = 50;

/// Value used for any stat the species record does not provide.
pub const DEFAULT_BASE_STAT: u16 = 50;

/// Level-up moves are preferred only when a species has at least this many.
const MIN_LEVEL_UP_CANDIDATES: usize = 6;

/// Max HP at a given level: `floor(base_hp * level / 50) + 50`.
pub fn max_hp(base_hp: u16, level: u16) -> u16 {
    let scaled = (base_hp as u32 * level as u32) / 50;
    (scaled + 50).min(u16::MAX as u32) as u16
}

impl StatBlock {
    pub fn from_record(record: &SpeciesRecord) -> Self {
        Self {
            attack: record.base_stat("attack").unwrap_or(DEFAULT_BASE_STAT),
            defense: record.base_stat("defense").unwrap_or(DEFAULT_BASE_STAT),
            speed: record.base_stat("speed").unwrap_or(DEFAULT_BASE_STAT),
        }
    }
}

/// Max HP of a species at the battle level.
pub fn species_max_hp(record: &SpeciesRecord) -> u16 {
    max_hp(
        record.base_stat("hp").unwrap_or(DEFAULT_BASE_STAT),
        BATTLE_LEVEL,
    )
}

/// Types in slot order; unknown names are skipped and an empty result falls
/// back to `Normal`.
pub fn species_types(record: &SpeciesRecord) -> Vec<PokemonType> {
    let types: Vec<PokemonType> = record
        .type_names()
        .into_iter()
        .filter_map(PokemonType::from_name)
        .collect();

    if types.is_empty() {
        vec![PokemonType::Normal]
    } else {
        types
    }
}

/// Four generic attacks of the species' primary type.
pub fn fallback_attacks(primary_type: PokemonType) -> Vec<Attack> {
    [
        (1, "Quick Strike", 30),
        (2, "Standard Strike", 50),
        (3, "Heavy Strike", 70),
        (4, "Special Strike", 90),
    ]
    .into_iter()
    .map(|(id, name, power)| Attack {
        id,
        name: name.to_string(),
        power,
        move_type: primary_type,
    })
    .collect()
}

/// Names of the moves worth looking up for a species, capped at `limit`.
///
/// Level-up moves are preferred when the species has enough of them; otherwise
/// the whole learnset is considered.
pub fn move_candidates(record: &SpeciesRecord, limit: usize) -> Vec<String> {
    let level_up: Vec<&str> = record
        .moves
        .iter()
        .filter(|entry| entry.learned_by_level_up())
        .map(|entry| entry.move_.name.as_str())
        .collect();

    let pool: Vec<&str> = if level_up.len() >= MIN_LEVEL_UP_CANDIDATES {
        level_up
    } else {
        record
            .moves
            .iter()
            .map(|entry| entry.move_.name.as_str())
            .collect()
    };

    pool.into_iter()
        .filter(|name| !name.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Picks up to four attacks spread across the power range of the damaging
/// moves: the weakest, roughly one third, two thirds, and the strongest.
///
/// Fewer than four damaging moves yields the fallback attacks instead.
pub fn select_attacks(details: &[MoveRecord], primary_type: PokemonType) -> Vec<Attack> {
    let mut damaging: Vec<&MoveRecord> = details.iter().filter(|m| m.is_damaging()).collect();
    if damaging.len() < 4 {
        return fallback_attacks(primary_type);
    }

    damaging.sort_by_key(|m| m.power.unwrap_or(0));

    let n = damaging.len();
    let mut indices = vec![0, n / 3, (n * 2) / 3, n - 1];
    indices.dedup();

    indices
        .into_iter()
        .take(4)
        .enumerate()
        .map(|(position, index)| {
            let record = damaging[index];
            Attack {
                id: position as u8 + 1,
                name: format_move_name(&record.name),
                power: record.power.unwrap_or(0),
                move_type: PokemonType::from_name(&record.type_.name).unwrap_or(primary_type),
            }
        })
        .collect()
}

/// "thunder-punch" -> "Thunder Punch"
pub fn format_move_name(name: &str) -> String {
    name.split(|c: char| c == '-' || c == ' ')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
