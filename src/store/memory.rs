//! In-process store used when no database is configured.
//!
//! Nothing survives a restart and state is not shared between processes, so
//! this is only suitable for tests, demos and a single-instance deployment.

use crate::battle::state::{Battle, BattleId, BattleSummary, TurnLogEntry};
use crate::errors::{StoreError, StoreResult};
use crate::ranking::UserStats;
use crate::store::{
    BattleFilter, BattleStore, InsertOutcome, Page, QueueEntry, QueueEntryStatus, QueueStore,
    StatsStore,
};
use async_trait::async_trait;
use schema::BattleStatus;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct BattleTable {
    battles: HashMap<BattleId, Battle>,
    /// Creation order, oldest first.
    order: Vec<BattleId>,
    turns: HashMap<BattleId, Vec<TurnLogEntry>>,
}

#[derive(Default)]
pub struct MemoryStore {
    battles: Mutex<BattleTable>,
    /// Queue entries in join order.
    queue: Mutex<Vec<QueueEntry>>,
    stats: Mutex<HashMap<String, UserStats>>,
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::CorruptedData("memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BattleStore for MemoryStore {
    async fn create(&self, battle: &Battle) -> StoreResult<BattleId> {
        let mut table = lock(&self.battles)?;
        if table.battles.contains_key(&battle.id) {
            return Err(StoreError::Conflict);
        }
        table.battles.insert(battle.id, battle.clone());
        table.order.push(battle.id);
        Ok(battle.id)
    }

    async fn load(&self, id: BattleId) -> StoreResult<Option<Battle>> {
        Ok(lock(&self.battles)?.battles.get(&id).cloned())
    }

    async fn save(&self, battle: &Battle, expected_turn: u32) -> StoreResult<()> {
        let mut table = lock(&self.battles)?;
        let stored = table
            .battles
            .get_mut(&battle.id)
            .ok_or_else(|| StoreError::Missing(format!("battle {}", battle.id)))?;

        if stored.status.is_terminal() {
            return Err(StoreError::Closed(stored.status));
        }
        if stored.turn_number != expected_turn {
            return Err(StoreError::Conflict);
        }

        let ratings_applied = stored.ratings_applied;
        *stored = battle.clone();
        stored.ratings_applied = ratings_applied;
        Ok(())
    }

    async fn finalize(&self, id: BattleId, status: BattleStatus) -> StoreResult<bool> {
        let mut table = lock(&self.battles)?;
        let stored = table
            .battles
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("battle {}", id)))?;

        if stored.status != status || !status.is_terminal() || stored.ratings_applied {
            return Ok(false);
        }
        stored.ratings_applied = true;
        Ok(true)
    }

    async fn record_turns(&self, id: BattleId, entries: &[TurnLogEntry]) -> StoreResult<()> {
        let mut table = lock(&self.battles)?;
        table.turns.entry(id).or_default().extend_from_slice(entries);
        Ok(())
    }

    async fn turn_log(&self, id: BattleId) -> StoreResult<Vec<TurnLogEntry>> {
        Ok(lock(&self.battles)?
            .turns
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list(&self, filter: &BattleFilter) -> StoreResult<Page<BattleSummary>> {
        let table = lock(&self.battles)?;
        let mut matching: Vec<&Battle> = table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.battles.get(id))
            .filter(|battle| filter.matches(battle))
            .collect();
        // Stable sort keeps the newest-created first among equal start times.
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let limit = filter.effective_limit();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(Battle::summary)
            .collect();

        Ok(Page::new(items, total, filter.offset, limit))
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn find_active(&self, user_id: &str) -> StoreResult<Option<QueueEntry>> {
        Ok(lock(&self.queue)?
            .iter()
            .find(|entry| entry.user_id == user_id)
            .cloned())
    }

    async fn oldest_waiting(&self, except_user: &str) -> StoreResult<Option<QueueEntry>> {
        Ok(lock(&self.queue)?
            .iter()
            .find(|entry| entry.status == QueueEntryStatus::Waiting && entry.user_id != except_user)
            .cloned())
    }

    async fn insert(&self, entry: &QueueEntry) -> StoreResult<InsertOutcome> {
        let mut queue = lock(&self.queue)?;
        if let Some(existing) = queue.iter().find(|e| e.user_id == entry.user_id) {
            return Ok(InsertOutcome::AlreadyQueued(existing.clone()));
        }
        queue.push(entry.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn claim(&self, entry_id: Uuid, battle_id: BattleId, claimer: &str) -> StoreResult<bool> {
        let mut queue = lock(&self.queue)?;
        match queue
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.status == QueueEntryStatus::Waiting)
        {
            Some(entry) => {
                entry.status = QueueEntryStatus::Matched;
                entry.battle_id = Some(battle_id);
                entry.matched_with = Some(claimer.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, entry_id: Uuid) -> StoreResult<()> {
        let mut queue = lock(&self.queue)?;
        if let Some(entry) = queue
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.status == QueueEntryStatus::Matched)
        {
            entry.status = QueueEntryStatus::Waiting;
            entry.battle_id = None;
            entry.matched_with = None;
        }
        Ok(())
    }

    async fn open_reserved(&self, entry_id: Uuid) -> StoreResult<bool> {
        let mut queue = lock(&self.queue)?;
        match queue
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.status == QueueEntryStatus::Pairing)
        {
            Some(entry) => {
                entry.status = QueueEntryStatus::Waiting;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn seat_reserved(
        &self,
        entry_id: Uuid,
        battle_id: BattleId,
        opponent: &str,
    ) -> StoreResult<bool> {
        let mut queue = lock(&self.queue)?;
        match queue
            .iter_mut()
            .find(|entry| entry.id == entry_id && entry.status == QueueEntryStatus::Pairing)
        {
            Some(entry) => {
                entry.status = QueueEntryStatus::Matched;
                entry.battle_id = Some(battle_id);
                entry.matched_with = Some(opponent.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn discard(&self, entry_id: Uuid) -> StoreResult<()> {
        lock(&self.queue)?.retain(|entry| entry.id != entry_id);
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> StoreResult<bool> {
        let mut queue = lock(&self.queue)?;
        let before = queue.len();
        queue.retain(|entry| entry.user_id != user_id);
        Ok(queue.len() != before)
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn load_stats(&self, user_id: &str) -> StoreResult<Option<UserStats>> {
        Ok(lock(&self.stats)?.get(user_id).cloned())
    }

    async fn save_stats(&self, stats: &UserStats, expected_total: u32) -> StoreResult<()> {
        let mut table = lock(&self.stats)?;
        let stored_total = table.get(&stats.user_id).map(|s| s.total_battles);
        match stored_total {
            None if expected_total == 0 => {}
            Some(total) if total == expected_total => {}
            _ => return Err(StoreError::Conflict),
        }
        table.insert(stats.user_id.clone(), stats.clone());
        Ok(())
    }

    async fn leaderboard(&self, offset: usize, limit: usize) -> StoreResult<Vec<UserStats>> {
        let table = lock(&self.stats)?;
        let mut ranked: Vec<&UserStats> = table.values().filter(|s| s.total_battles > 0).collect();
        ranked.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then_with(|| b.wins.cmp(&a.wins))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(ranked.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn count_ranked(&self) -> StoreResult<usize> {
        Ok(lock(&self.stats)?.values().filter(|s| s.total_battles > 0).count())
    }

    async fn count_rated_above(&self, rating: i32) -> StoreResult<usize> {
        Ok(lock(&self.stats)?
            .values()
            .filter(|s| s.total_battles > 0 && s.rating > rating)
            .count())
    }
}
