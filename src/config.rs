//! Runtime configuration loaded from the environment.

use std::env;
use std::time::Duration;

pub const DEFAULT_POKEAPI_BASE_URL: &str = "https://pokeapi.co/api/v2";

/// Top-level configuration for the arena services.
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_db_connections: u32,
    pub species: SpeciesSourceConfig,
    pub ranking: RankingConfig,
}

/// Species/move data source settings.
#[derive(Clone, Debug)]
pub struct SpeciesSourceConfig {
    pub base_url: String,
    /// Upper bound for every outbound request.
    pub request_timeout: Duration,
    /// How many move names are looked up when picking attacks.
    pub max_move_candidates: usize,
}

/// ELO and stats settings.
#[derive(Clone, Debug)]
pub struct RankingConfig {
    pub k_factor: f64,
    pub initial_rating: i32,
    /// Nominal rating the AI opponent is scored against.
    pub ai_rating: i32,
    /// Whether AI-mode results move the player's rating.
    pub rate_ai_battles: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_db_connections: 5,
            species: SpeciesSourceConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}

impl Default for SpeciesSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_POKEAPI_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(5000),
            max_move_candidates: 12,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            initial_rating: 1000,
            ai_rating: 1000,
            rate_ai_battles: false,
        }
    }
}

impl ArenaConfig {
    /// Loads `.env` (if present) and then reads overrides from the environment.
    ///
    /// Recognised variables:
    /// - `DATABASE_URL`: Postgres connection string (unset: in-memory store)
    /// - `ARENA_MAX_DB_CONNECTIONS`
    /// - `POKEAPI_BASE_URL`, `POKEAPI_TIMEOUT_MS`
    /// - `ARENA_K_FACTOR`, `ARENA_AI_RATING`, `ARENA_RATE_AI_BATTLES`
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        config.database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        if let Some(max) = read_env::<u32>("ARENA_MAX_DB_CONNECTIONS") {
            config.max_db_connections = max.max(1);
        }
        if let Ok(base_url) = env::var("POKEAPI_BASE_URL") {
            config.species.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(timeout_ms) = read_env::<u64>("POKEAPI_TIMEOUT_MS") {
            config.species.request_timeout = Duration::from_millis(timeout_ms.max(100));
        }
        if let Some(k_factor) = read_env::<f64>("ARENA_K_FACTOR") {
            config.ranking.k_factor = k_factor;
        }
        if let Some(ai_rating) = read_env::<i32>("ARENA_AI_RATING") {
            config.ranking.ai_rating = ai_rating;
        }
        if let Some(rate_ai) = read_env::<bool>("ARENA_RATE_AI_BATTLES") {
            config.ranking.rate_ai_battles = rate_ai;
        }

        config
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ArenaConfig::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.species.base_url, DEFAULT_POKEAPI_BASE_URL);
        assert_eq!(config.species.max_move_candidates, 12);
        assert_eq!(config.ranking.k_factor, 32.0);
        assert_eq!(config.ranking.ai_rating, 1000);
        assert!(!config.ranking.rate_ai_battles);
    }
}
