//! Storage abstraction for battles, the matchmaking queue and user stats.
//!
//! Every write that races with another request is conditional: the store
//! checks the value the caller read and reports `StoreError::Conflict` when it
//! changed underneath.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::battle::state::{Battle, BattleId, BattleSummary, TurnLogEntry};
use crate::errors::StoreResult;
use crate::ranking::UserStats;
use async_trait::async_trait;
use schema::BattleStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_HISTORY_LIMIT: usize = 50;

/// Battle history query.
#[derive(Debug, Clone, Default)]
pub struct BattleFilter {
    /// Only battles this user took part in.
    pub user_id: Option<String>,
    pub status: Option<BattleStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl BattleFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: BattleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Requested limit, defaulted and capped.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }

    pub fn matches(&self, battle: &Battle) -> bool {
        let user_matches = self
            .user_id
            .as_deref()
            .map(|user_id| battle.side_of(user_id).is_some())
            .unwrap_or(true);
        let status_matches = self.status.map(|status| battle.status == status).unwrap_or(true);
        user_matches && status_matches
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, offset: usize, limit: usize) -> Self {
        let has_more = offset + items.len() < total;
        Self {
            items,
            total,
            offset,
            limit,
            has_more,
        }
    }
}

#[async_trait]
pub trait BattleStore: Send + Sync {
    async fn create(&self, battle: &Battle) -> StoreResult<BattleId>;

    /// `Ok(None)` when no battle has this id.
    async fn load(&self, id: BattleId) -> StoreResult<Option<Battle>>;

    /// Writes the battle only if the stored copy is still active and its turn
    /// counter equals `expected_turn`.
    ///
    /// A stored terminal battle yields `StoreError::Closed`, a moved turn
    /// counter yields `StoreError::Conflict`.
    async fn save(&self, battle: &Battle, expected_turn: u32) -> StoreResult<()>;

    /// Marks a finished battle as rated. Returns `true` only for the first
    /// caller, and only when the stored status is `status`.
    async fn finalize(&self, id: BattleId, status: BattleStatus) -> StoreResult<bool>;

    async fn record_turns(&self, id: BattleId, entries: &[TurnLogEntry]) -> StoreResult<()>;

    async fn turn_log(&self, id: BattleId) -> StoreResult<Vec<TurnLogEntry>>;

    /// Newest first.
    async fn list(&self, filter: &BattleFilter) -> StoreResult<Page<BattleSummary>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEntryStatus {
    /// Reserved by a join that is still looking for an opponent. Never
    /// offered to other joiners.
    Pairing,
    Waiting,
    Matched,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryStatus::Pairing => "pairing",
            QueueEntryStatus::Waiting => "waiting",
            QueueEntryStatus::Matched => "matched",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pairing" => Some(QueueEntryStatus::Pairing),
            "waiting" => Some(QueueEntryStatus::Waiting),
            "matched" => Some(QueueEntryStatus::Matched),
            _ => None,
        }
    }
}

/// A user's place in the matchmaking queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub species_ref: String,
    pub status: QueueEntryStatus,
    pub battle_id: Option<BattleId>,
    pub matched_with: Option<String>,
    pub joined_at: u64,
}

impl QueueEntry {
    pub fn waiting(user_id: &str, display_name: &str, species_ref: &str, joined_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            species_ref: species_ref.to_string(),
            status: QueueEntryStatus::Waiting,
            battle_id: None,
            matched_with: None,
            joined_at,
        }
    }

    /// The placeholder a join holds while it pairs.
    pub fn pairing(user_id: &str, display_name: &str, species_ref: &str, joined_at: u64) -> Self {
        Self {
            status: QueueEntryStatus::Pairing,
            ..Self::waiting(user_id, display_name, species_ref, joined_at)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// The user already holds a pairing, waiting or matched entry.
    AlreadyQueued(QueueEntry),
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// The user's pairing, waiting or matched entry, if any.
    async fn find_active(&self, user_id: &str) -> StoreResult<Option<QueueEntry>>;

    /// Longest-waiting entry that does not belong to `except_user`.
    async fn oldest_waiting(&self, except_user: &str) -> StoreResult<Option<QueueEntry>>;

    /// Adds the entry unless the user already holds one.
    async fn insert(&self, entry: &QueueEntry) -> StoreResult<InsertOutcome>;

    /// Atomically moves a waiting entry to matched. Returns `false` when some
    /// other request claimed or removed it first.
    async fn claim(&self, entry_id: Uuid, battle_id: BattleId, claimer: &str) -> StoreResult<bool>;

    /// Undoes a claim whose battle could not be created.
    async fn release(&self, entry_id: Uuid) -> StoreResult<()>;

    /// Turns a pairing placeholder into a waiting entry. Returns `false` when
    /// the placeholder is gone.
    async fn open_reserved(&self, entry_id: Uuid) -> StoreResult<bool>;

    /// Turns a pairing placeholder into a matched entry for `battle_id`.
    async fn seat_reserved(
        &self,
        entry_id: Uuid,
        battle_id: BattleId,
        opponent: &str,
    ) -> StoreResult<bool>;

    /// Deletes one entry by id, whatever its status.
    async fn discard(&self, entry_id: Uuid) -> StoreResult<()>;

    /// Removes the user's entry. Returns whether one existed.
    async fn remove(&self, user_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn load_stats(&self, user_id: &str) -> StoreResult<Option<UserStats>>;

    /// Writes the stats only if the stored total still equals
    /// `expected_total`. A user without a row expects 0.
    async fn save_stats(&self, stats: &UserStats, expected_total: u32) -> StoreResult<()>;

    /// Users with at least one battle, best rating first.
    async fn leaderboard(&self, offset: usize, limit: usize) -> StoreResult<Vec<UserStats>>;

    /// Number of users with at least one battle.
    async fn count_ranked(&self) -> StoreResult<usize>;

    /// Number of ranked users with a rating strictly above `rating`.
    async fn count_rated_above(&self, rating: i32) -> StoreResult<usize>;
}
