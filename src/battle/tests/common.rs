use crate::battle::engine::start_battle;
use crate::battle::service::{BattleService, Caller};
use crate::battle::state::{Battle, BattleId, Combatant, StatBlock, TurnRng, AI_USER_ID};
use crate::battle::stats::fallback_attacks;
use crate::config::RankingConfig;
use crate::errors::ArenaResult;
use crate::ranking::RankingService;
use crate::species::{MoveCache, SpeciesCatalog, StaticSpeciesSource};
use crate::store::MemoryStore;
use schema::{Attack, BattleMode, PokemonType};
use std::sync::Arc;

/// Timestamp every test battle starts at.
pub const TEST_START: u64 = 1_700_000_000;

/// A builder for creating test combatants with common defaults.
///
/// # Example
/// ```
/// let combatant = TestCombatantBuilder::new("pikachu")
///     .with_types(vec![PokemonType::Electric])
///     .with_hp(30)
///     .build();
/// ```
pub struct TestCombatantBuilder {
    species_name: String,
    user_id: String,
    display_name: String,
    types: Vec<PokemonType>,
    max_hp: u16,
    current_hp: Option<u16>,
    stats: StatBlock,
    attacks: Option<Vec<Attack>>,
}

impl TestCombatantBuilder {
    /// Creates a builder with 100 HP, 50 in every stat and the four fallback
    /// attacks of its type.
    pub fn new(species_name: &str) -> Self {
        Self {
            species_name: species_name.to_string(),
            user_id: "user-1".to_string(),
            display_name: "Player 1".to_string(),
            types: vec![PokemonType::Normal],
            max_hp: 100,
            current_hp: None,
            stats: StatBlock {
                attack: 50,
                defense: 50,
                speed: 50,
            },
            attacks: None,
        }
    }

    pub fn with_owner(mut self, user_id: &str, display_name: &str) -> Self {
        self.user_id = user_id.to_string();
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_types(mut self, types: Vec<PokemonType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_max_hp(mut self, max_hp: u16) -> Self {
        self.max_hp = max_hp;
        self
    }

    /// Sets the current HP. If not set, HP will be max.
    pub fn with_hp(mut self, hp: u16) -> Self {
        self.current_hp = Some(hp);
        self
    }

    pub fn with_stats(mut self, attack: u16, defense: u16) -> Self {
        self.stats.attack = attack;
        self.stats.defense = defense;
        self
    }

    pub fn with_attacks(mut self, attacks: Vec<Attack>) -> Self {
        self.attacks = Some(attacks);
        self
    }

    pub fn build(self) -> Combatant {
        let primary = self.types.first().copied().unwrap_or(PokemonType::Normal);
        Combatant {
            user_id: self.user_id,
            display_name: self.display_name,
            species_id: 1,
            species_name: self.species_name,
            types: self.types,
            current_hp: self.current_hp.unwrap_or(self.max_hp).min(self.max_hp),
            max_hp: self.max_hp,
            stats: self.stats,
            attacks: self.attacks.unwrap_or_else(|| fallback_attacks(primary)),
        }
    }
}

pub fn attack(id: u8, name: &str, power: u16, move_type: PokemonType) -> Attack {
    Attack {
        id,
        name: name.to_string(),
        power,
        move_type,
    }
}

/// Starts a battle between two built combatants, keeping any HP the builders
/// set below max.
pub fn create_battle_with(mode: BattleMode, player1: Combatant, player2: Combatant) -> Battle {
    let hp = [player1.current_hp, player2.current_hp];
    let mut battle = start_battle(BattleId::new(), player1, player2, mode, TEST_START);
    battle.players[0].current_hp = hp[0];
    battle.players[1].current_hp = hp[1];
    battle
}

/// Creates a standard battle between "user-1" (Pikachu) and either "user-2"
/// (Charmander) or the AI.
pub fn create_test_battle(mode: BattleMode) -> Battle {
    let player1 = TestCombatantBuilder::new("pikachu")
        .with_owner("user-1", "Ash")
        .with_types(vec![PokemonType::Electric])
        .build();
    let (opponent_id, opponent_name) = match mode {
        BattleMode::Ai => (AI_USER_ID, "Computer"),
        BattleMode::Pvp => ("user-2", "Gary"),
    };
    let player2 = TestCombatantBuilder::new("charmander")
        .with_owner(opponent_id, opponent_name)
        .with_types(vec![PokemonType::Fire])
        .build();

    create_battle_with(mode, player1, player2)
}

/// A `TurnRng` whose every roll is 0.5: damage variation of exactly 1.0.
pub fn predictable_rng() -> TurnRng {
    TurnRng::new_for_test(vec![0.5])
}

/// Helper function to assert that a Result is Ok and return the value.
pub fn assert_ok<T>(result: ArenaResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("Expected Ok but got error: {}", err),
    }
}

/// Species known to the test source. With fallback attacks and neutral types:
/// - tauros: 100 HP, 100 attack, 50 defense
/// - snorlax: 100 HP, 50 attack, 100 defense
/// - pikachu and charmander for matchmaking scenarios.
pub fn test_species_source() -> StaticSpeciesSource {
    StaticSpeciesSource::new()
        .with_basic_species(128, "tauros", [50, 100, 50, 110], &["normal"])
        .with_basic_species(143, "snorlax", [50, 50, 100, 30], &["normal"])
        .with_basic_species(25, "pikachu", [35, 55, 40, 90], &["electric"])
        .with_basic_species(4, "charmander", [39, 52, 43, 65], &["fire"])
}

pub fn test_catalog(source: Arc<StaticSpeciesSource>) -> SpeciesCatalog {
    SpeciesCatalog::new(source, Arc::new(MoveCache::new()), 12)
}

/// A service over the given in-memory store whose every roll is 0.5.
pub fn create_test_service(store: Arc<MemoryStore>) -> BattleService {
    let ranking = RankingService::new(store.clone(), RankingConfig::default());
    BattleService::new(store, test_catalog(Arc::new(test_species_source())), ranking)
        .with_rng_factory(predictable_rng)
}

pub fn caller(user_id: &str) -> Caller {
    Caller::new(user_id, format!("Trainer {}", user_id))
}
