//! Wiring of stores, species source and services into one handle.

use crate::battle::service::BattleService;
use crate::battle::state::BattleSummary;
use crate::config::ArenaConfig;
use crate::errors::ArenaResult;
use crate::matchmaking::MatchmakingQueue;
use crate::ranking::{RankingService, UserStatsView};
use crate::species::{MoveCache, PokeApiClient, SpeciesCatalog, SpeciesSource};
use crate::store::{BattleFilter, BattleStore, MemoryStore, PgStore, QueueStore, StatsStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const PROFILE_RECENT_BATTLES: usize = 5;

/// Stats plus the most recent battles of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub stats: Option<UserStatsView>,
    pub recent_battles: Vec<BattleSummary>,
}

#[derive(Clone)]
pub struct Arena {
    pub battles: BattleService,
    pub matchmaking: MatchmakingQueue,
    pub ranking: RankingService,
}

impl Arena {
    /// Connects to Postgres when `DATABASE_URL` is configured, otherwise falls
    /// back to the in-memory store.
    pub async fn connect(config: ArenaConfig) -> ArenaResult<Self> {
        let source: Arc<dyn SpeciesSource> = Arc::new(PokeApiClient::new(&config.species)?);

        match config.database_url.as_deref() {
            Some(url) => {
                let store = Arc::new(PgStore::connect(url, config.max_db_connections).await?);
                info!(max_connections = config.max_db_connections, "Using Postgres store");
                Ok(Self::assemble(&config, source, store.clone(), store.clone(), store))
            }
            None => {
                warn!("DATABASE_URL not set, battles are kept in memory and lost on exit");
                Ok(Self::in_memory(&config, source))
            }
        }
    }

    /// The full service graph over a fresh `MemoryStore`.
    pub fn in_memory(config: &ArenaConfig, source: Arc<dyn SpeciesSource>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(config, source, store.clone(), store.clone(), store)
    }

    fn assemble(
        config: &ArenaConfig,
        source: Arc<dyn SpeciesSource>,
        battles: Arc<dyn BattleStore>,
        queue: Arc<dyn QueueStore>,
        stats: Arc<dyn StatsStore>,
    ) -> Self {
        let catalog = SpeciesCatalog::new(
            source,
            Arc::new(MoveCache::new()),
            config.species.max_move_candidates,
        );
        let ranking = RankingService::new(stats, config.ranking.clone());
        let battle_service = BattleService::new(battles, catalog, ranking.clone());
        let matchmaking = MatchmakingQueue::new(queue, battle_service.clone());

        Self {
            battles: battle_service,
            matchmaking,
            ranking,
        }
    }

    pub async fn user_profile(&self, user_id: &str) -> ArenaResult<UserProfile> {
        let filter = BattleFilter::for_user(user_id).with_limit(PROFILE_RECENT_BATTLES);
        let (stats, recent) = futures_util::try_join!(
            self.ranking.user_stats(user_id),
            self.battles.history(&filter),
        )?;

        Ok(UserProfile {
            user_id: user_id.to_string(),
            stats,
            recent_battles: recent.items,
        })
    }
}
