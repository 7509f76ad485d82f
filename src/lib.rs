//! Pokemon Arena
//!
//! Server-authoritative core of a Pokemon battle mini-game: single-Pokemon
//! battles against the computer or another player, FIFO matchmaking, and
//! per-user stats with ELO ratings.

pub mod arena;
pub mod battle;
pub mod config;
pub mod errors;
pub mod matchmaking;
pub mod ranking;
pub mod species;
pub mod store;

// --- From the `schema` crate ---
pub use schema::{Attack, BattleMode, BattleStatus, MoveRecord, PokemonType, Side, SpeciesRecord};

// --- From this crate's modules ---
pub use arena::{Arena, UserProfile};
pub use battle::ai::{Behavior, RandomAI, StrongestAttackAI};
pub use battle::calculators::{calculate_damage, DamageRoll};
pub use battle::engine::{forfeit, resolve_turn, start_battle};
pub use battle::service::{BattleService, Caller};
pub use battle::state::{
    Battle, BattleId, BattleSummary, BattleView, Combatant, TurnLogEntry, TurnReport, TurnRng,
};
pub use config::{ArenaConfig, RankingConfig, SpeciesSourceConfig};
pub use errors::{ArenaError, ArenaResult, ErrorKind, SourceError, StoreError};
pub use matchmaking::{JoinOutcome, MatchEvent, MatchmakingQueue, QueueStatus};
pub use ranking::{Leaderboard, RankingService, UserStats, UserStatsView};
pub use species::{PokeApiClient, SpeciesCatalog, SpeciesSource};
pub use store::{BattleFilter, BattleStore, MemoryStore, Page, PgStore, QueueStore, StatsStore};
