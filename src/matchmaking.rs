//! FIFO matchmaking for PvP battles.
//!
//! Pairing is claim-first: the joiner holds its own `pairing` entry, then
//! reserves the oldest waiting entry with a conditional `waiting -> matched`
//! update before the battle is created. A waiting user can never end up in
//! two battles, and one user's overlapping joins pair at most once.

use crate::battle::service::{BattleService, Caller};
use crate::battle::state::{current_timestamp, BattleId, Combatant};
use crate::errors::{ArenaError, ArenaResult};
use crate::species::normalize_species_ref;
use crate::store::{InsertOutcome, QueueEntry, QueueEntryStatus, QueueStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const MATCH_EVENT_BUFFER: usize = 64;

/// Age after which a `pairing` reservation is treated as left behind by a
/// join that never finished.
pub const PAIRING_TIMEOUT_SECS: u64 = 30;

/// Published whenever two users are paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub battle_id: BattleId,
    /// The user who was waiting; acts first.
    pub player1: String,
    /// The user whose join completed the pair.
    pub player2: String,
    pub matched_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JoinOutcome {
    Queued,
    Matched { battle_id: BattleId, opponent: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub in_queue: bool,
    pub status: Option<QueueEntryStatus>,
    pub battle_id: Option<BattleId>,
    pub matched_with: Option<String>,
}

impl QueueStatus {
    fn idle() -> Self {
        Self {
            in_queue: false,
            status: None,
            battle_id: None,
            matched_with: None,
        }
    }
}

#[derive(Clone)]
pub struct MatchmakingQueue {
    queue: Arc<dyn QueueStore>,
    battles: BattleService,
    events: broadcast::Sender<MatchEvent>,
}

impl MatchmakingQueue {
    pub fn new(queue: Arc<dyn QueueStore>, battles: BattleService) -> Self {
        let (events, _) = broadcast::channel(MATCH_EVENT_BUFFER);
        Self {
            queue,
            battles,
            events,
        }
    }

    /// Receiver of every pairing made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    /// Puts the caller in the queue or pairs them with the longest-waiting
    /// user. Joining again while queued or matched is a no-op that reports the
    /// current state.
    ///
    /// The joiner first reserves its own entry as `pairing`. The per-user
    /// uniqueness of live entries makes an overlapping join by the same user
    /// stop there instead of claiming a second opponent.
    pub async fn join(&self, caller: &Caller, species: &str) -> ArenaResult<JoinOutcome> {
        let user_id = caller.authenticated()?;
        let species_ref = normalize_species_ref(species)?;

        if let Some(outcome) = self.existing_outcome(user_id).await? {
            return Ok(outcome);
        }

        let catalog = self.battles.catalog();
        let joiner = catalog
            .derive_combatant(&species_ref, user_id, caller.display_name())
            .await?;

        let reserved = QueueEntry::pairing(
            user_id,
            caller.display_name(),
            &species_ref,
            current_timestamp(),
        );
        if let InsertOutcome::AlreadyQueued(existing) = self.queue.insert(&reserved).await? {
            debug!(user_id = %user_id, "Another join for this user is in progress");
            return Ok(outcome_for(&existing));
        }

        match self.pair_reserved(&reserved, joiner).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => self.open_reserved(&reserved).await,
            Err(err) => {
                self.discard_reserved(&reserved).await;
                Err(err)
            }
        }
    }

    /// Claims the oldest waiting entry for the reserved joiner and creates the
    /// battle. `None` means there was nobody to claim.
    async fn pair_reserved(
        &self,
        reserved: &QueueEntry,
        joiner: Combatant,
    ) -> ArenaResult<Option<JoinOutcome>> {
        let user_id = reserved.user_id.as_str();
        let Some(waiting) = self.queue.oldest_waiting(user_id).await? else {
            return Ok(None);
        };

        let opponent = self
            .battles
            .catalog()
            .derive_combatant(&waiting.species_ref, &waiting.user_id, &waiting.display_name)
            .await?;

        let battle_id = BattleId::new();
        if !self.queue.claim(waiting.id, battle_id, user_id).await? {
            debug!(user_id = %user_id, "Queue entry claimed by another join, enqueueing");
            return Ok(None);
        }

        if let Err(err) = self
            .battles
            .init_pvp_battle(battle_id, opponent, joiner)
            .await
        {
            if let Err(release_err) = self.queue.release(waiting.id).await {
                warn!(
                    user_id = %waiting.user_id,
                    error = %release_err,
                    "Failed to release claimed queue entry"
                );
            }
            return Err(err);
        }

        Ok(Some(self.complete_match(reserved, &waiting, battle_id).await))
    }

    async fn open_reserved(&self, reserved: &QueueEntry) -> ArenaResult<JoinOutcome> {
        if !self.queue.open_reserved(reserved.id).await? {
            // The user left while the join was pairing.
            return Err(ArenaError::Conflict);
        }
        info!(
            user_id = %reserved.user_id,
            species = %reserved.species_ref,
            "Joined matchmaking queue"
        );
        Ok(JoinOutcome::Queued)
    }

    async fn discard_reserved(&self, reserved: &QueueEntry) {
        if let Err(err) = self.queue.discard(reserved.id).await {
            warn!(
                user_id = %reserved.user_id,
                error = %err,
                "Failed to discard queue reservation"
            );
        }
    }

    /// Removes the caller from the queue. Returns whether an entry existed.
    pub async fn leave(&self, caller: &Caller) -> ArenaResult<bool> {
        let user_id = caller.authenticated()?;
        let removed = self.queue.remove(user_id).await?;
        if removed {
            info!(user_id = %user_id, "Left matchmaking queue");
        }
        Ok(removed)
    }

    pub async fn check(&self, caller: &Caller) -> ArenaResult<QueueStatus> {
        let user_id = caller.authenticated()?;
        let Some(entry) = self.queue.find_active(user_id).await? else {
            return Ok(QueueStatus::idle());
        };
        let status = match entry.status {
            QueueEntryStatus::Matched => {
                if !self.battle_is_active(entry.battle_id).await? {
                    return Ok(QueueStatus::idle());
                }
                QueueEntryStatus::Matched
            }
            QueueEntryStatus::Pairing | QueueEntryStatus::Waiting => QueueEntryStatus::Waiting,
        };

        Ok(QueueStatus {
            in_queue: true,
            status: Some(status),
            battle_id: entry.battle_id,
            matched_with: entry.matched_with,
        })
    }

    /// Outcome for a user who already holds an entry, or `None` when the join
    /// should go ahead. A matched entry whose battle is over is stale and is
    /// dropped.
    async fn existing_outcome(&self, user_id: &str) -> ArenaResult<Option<JoinOutcome>> {
        let Some(existing) = self.queue.find_active(user_id).await? else {
            return Ok(None);
        };

        match existing.status {
            QueueEntryStatus::Pairing => {
                if current_timestamp().saturating_sub(existing.joined_at) < PAIRING_TIMEOUT_SECS {
                    return Ok(Some(JoinOutcome::Queued));
                }
                warn!(user_id = %user_id, "Discarding abandoned queue reservation");
                self.queue.discard(existing.id).await?;
                Ok(None)
            }
            QueueEntryStatus::Waiting => Ok(Some(JoinOutcome::Queued)),
            QueueEntryStatus::Matched => {
                if self.battle_is_active(existing.battle_id).await? {
                    return Ok(Some(outcome_for(&existing)));
                }
                debug!(user_id = %user_id, "Dropping stale matched queue entry");
                self.queue.remove(user_id).await?;
                Ok(None)
            }
        }
    }

    async fn battle_is_active(&self, battle_id: Option<BattleId>) -> ArenaResult<bool> {
        let Some(battle_id) = battle_id else {
            return Ok(false);
        };
        Ok(self
            .battles
            .store()
            .load(battle_id)
            .await?
            .map(|battle| battle.is_active())
            .unwrap_or(false))
    }

    async fn complete_match(
        &self,
        reserved: &QueueEntry,
        waiting: &QueueEntry,
        battle_id: BattleId,
    ) -> JoinOutcome {
        let user_id = reserved.user_id.as_str();
        let now = current_timestamp();
        match self.queue.seat_reserved(reserved.id, battle_id, &waiting.user_id).await {
            Ok(true) => {}
            Ok(false) => warn!(user_id = %user_id, "Queue reservation vanished before the match"),
            Err(err) => warn!(user_id = %user_id, error = %err, "Failed to record matched entry"),
        }

        info!(
            battle_id = %battle_id,
            player1 = %waiting.user_id,
            player2 = %user_id,
            "Match made"
        );

        // No subscribers is fine.
        let _ = self.events.send(MatchEvent {
            battle_id,
            player1: waiting.user_id.clone(),
            player2: user_id.to_string(),
            matched_at: now,
        });

        JoinOutcome::Matched {
            battle_id,
            opponent: waiting.user_id.clone(),
        }
    }
}

fn outcome_for(entry: &QueueEntry) -> JoinOutcome {
    match (entry.status, entry.battle_id) {
        (QueueEntryStatus::Matched, Some(battle_id)) => JoinOutcome::Matched {
            battle_id,
            opponent: entry.matched_with.clone().unwrap_or_default(),
        },
        _ => JoinOutcome::Queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::state::{Battle, BattleSummary, TurnLogEntry};
    use crate::battle::tests::common::{caller, create_test_service};
    use crate::errors::{StoreError, StoreResult};
    use crate::store::{BattleFilter, BattleStore, MemoryStore, Page};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use schema::{BattleStatus, Side};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;
    use uuid::Uuid;

    fn matchmaking(store: Arc<MemoryStore>) -> MatchmakingQueue {
        MatchmakingQueue::new(store.clone(), create_test_service(store))
    }

    fn matched_battle(outcome: &JoinOutcome) -> BattleId {
        match outcome {
            JoinOutcome::Matched { battle_id, .. } => *battle_id,
            JoinOutcome::Queued => panic!("expected a match, got {:?}", outcome),
        }
    }

    #[tokio::test]
    async fn test_second_join_creates_battle() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store.clone());
        let mut events = queue.subscribe();

        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);
        let outcome = queue.join(&caller("user-2"), "Charmander").await.unwrap();
        let battle_id = matched_battle(&outcome);
        assert_eq!(
            outcome,
            JoinOutcome::Matched {
                battle_id,
                opponent: "user-1".to_string()
            }
        );

        let battle = store.load(battle_id).await.unwrap().unwrap();
        assert_eq!(battle.players[0].user_id, "user-1");
        assert_eq!(battle.players[0].species_name, "pikachu");
        assert_eq!(battle.players[1].user_id, "user-2");
        assert_eq!(battle.current_turn, Some(Side::Player1));

        let event = events.recv().await.unwrap();
        assert_eq!((event.player1.as_str(), event.player2.as_str()), ("user-1", "user-2"));
        assert_eq!(event.battle_id, battle_id);

        let status = queue.check(&caller("user-1")).await.unwrap();
        assert!(status.in_queue);
        assert_eq!(status.status, Some(QueueEntryStatus::Matched));
        assert_eq!(status.battle_id, Some(battle_id));
        assert_eq!(status.matched_with.as_deref(), Some("user-2"));
    }

    #[tokio::test]
    async fn test_rejoining_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store);

        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);
        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);

        let first = queue.join(&caller("user-2"), "charmander").await.unwrap();
        for user in ["user-1", "user-2"] {
            let again = queue.join(&caller(user), "pikachu").await.unwrap();
            assert_eq!(matched_battle(&again), matched_battle(&first));
        }
    }

    #[tokio::test]
    async fn test_stale_match_is_dropped_on_join() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store.clone());
        let service = create_test_service(store.clone());

        queue.join(&caller("user-1"), "pikachu").await.unwrap();
        let battle_id = matched_battle(&queue.join(&caller("user-2"), "charmander").await.unwrap());
        service.forfeit(battle_id, &caller("user-2")).await.unwrap();

        assert!(!queue.check(&caller("user-1")).await.unwrap().in_queue);
        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);
        let status = queue.check(&caller("user-1")).await.unwrap();
        assert_eq!(status.status, Some(QueueEntryStatus::Waiting));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store);

        queue.join(&caller("user-1"), "pikachu").await.unwrap();
        assert!(queue.leave(&caller("user-1")).await.unwrap());
        assert!(!queue.leave(&caller("user-1")).await.unwrap());

        // Nobody is waiting any more, so the next join queues.
        assert_eq!(queue.join(&caller("user-2"), "pikachu").await.unwrap(), JoinOutcome::Queued);
    }

    #[tokio::test]
    async fn test_join_validation() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store);

        assert!(matches!(
            queue.join(&caller("user-1"), "  ").await,
            Err(ArenaError::Validation(_))
        ));
        assert!(matches!(
            queue.join(&Caller::new("", ""), "pikachu").await,
            Err(ArenaError::Unauthenticated)
        ));
        assert!(matches!(
            queue.join(&caller("user-1"), "digimon").await,
            Err(ArenaError::NotFound(_))
        ));
        assert!(!queue.check(&caller("user-1")).await.unwrap().in_queue);
    }

    #[tokio::test]
    async fn test_oldest_waiting_user_is_matched_first() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store);

        queue.join(&caller("user-1"), "pikachu").await.unwrap();
        let first = queue.join(&caller("user-2"), "pikachu").await.unwrap();
        matched_battle(&first);

        // user-1 and user-2 are paired, so user-3 waits alone.
        assert_eq!(queue.join(&caller("user-3"), "tauros").await.unwrap(), JoinOutcome::Queued);
        let outcome = queue.join(&caller("user-4"), "snorlax").await.unwrap();
        assert_eq!(
            outcome,
            JoinOutcome::Matched {
                battle_id: matched_battle(&outcome),
                opponent: "user-3".to_string()
            }
        );
    }

    /// Battle store whose `create` always fails.
    struct BrokenBattles(MemoryStore);

    #[async_trait]
    impl BattleStore for BrokenBattles {
        async fn create(&self, _battle: &Battle) -> StoreResult<BattleId> {
            Err(StoreError::CorruptedData("disk full".to_string()))
        }

        async fn load(&self, id: BattleId) -> StoreResult<Option<Battle>> {
            self.0.load(id).await
        }

        async fn save(&self, battle: &Battle, expected_turn: u32) -> StoreResult<()> {
            self.0.save(battle, expected_turn).await
        }

        async fn finalize(&self, id: BattleId, status: BattleStatus) -> StoreResult<bool> {
            self.0.finalize(id, status).await
        }

        async fn record_turns(&self, id: BattleId, entries: &[TurnLogEntry]) -> StoreResult<()> {
            self.0.record_turns(id, entries).await
        }

        async fn turn_log(&self, id: BattleId) -> StoreResult<Vec<TurnLogEntry>> {
            self.0.turn_log(id).await
        }

        async fn list(&self, filter: &BattleFilter) -> StoreResult<Page<BattleSummary>> {
            self.0.list(filter).await
        }
    }

    #[tokio::test]
    async fn test_failed_battle_creation_releases_claim() {
        use crate::battle::tests::common::{predictable_rng, test_catalog, test_species_source};
        use crate::config::RankingConfig;
        use crate::ranking::RankingService;

        let store = Arc::new(MemoryStore::new());
        let service = BattleService::new(
            Arc::new(BrokenBattles(MemoryStore::new())),
            test_catalog(Arc::new(test_species_source())),
            RankingService::new(store.clone(), RankingConfig::default()),
        )
        .with_rng_factory(predictable_rng);
        let queue = MatchmakingQueue::new(store.clone(), service);

        queue.join(&caller("user-1"), "pikachu").await.unwrap();
        let result = queue.join(&caller("user-2"), "charmander").await;
        assert!(matches!(result, Err(ArenaError::Persistence(_))));

        let status = queue.check(&caller("user-1")).await.unwrap();
        assert_eq!(status.status, Some(QueueEntryStatus::Waiting));
        assert_eq!(status.battle_id, None);
        assert!(!queue.check(&caller("user-2")).await.unwrap().in_queue);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_never_double_match() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store.clone());

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let user = format!("user-{}", i);
                    let outcome = queue.join(&caller(&user), "pikachu").await;
                    (user, outcome)
                })
            })
            .collect();

        let mut outcomes = HashMap::new();
        for handle in handles {
            let (user, outcome) = handle.await.unwrap();
            outcomes.insert(user, outcome.unwrap());
        }

        let battles = store.list(&BattleFilter::default().with_limit(50)).await.unwrap();
        let mut seats: HashMap<String, usize> = HashMap::new();
        for summary in &battles.items {
            assert_ne!(summary.player1.user_id, summary.player2.user_id);
            *seats.entry(summary.player1.user_id.clone()).or_default() += 1;
            *seats.entry(summary.player2.user_id.clone()).or_default() += 1;
        }

        for (user, outcome) in &outcomes {
            let in_battles = seats.get(user).copied().unwrap_or(0);
            let status = queue.check(&caller(user)).await.unwrap();
            match status.status {
                Some(QueueEntryStatus::Waiting) => {
                    assert_eq!(in_battles, 0, "{} waiting and seated", user)
                }
                Some(QueueEntryStatus::Matched) => {
                    assert_eq!(in_battles, 1, "{} seated {} times", user, in_battles)
                }
                Some(QueueEntryStatus::Pairing) => panic!("{} reported mid-pairing", user),
                None => panic!("{} lost its queue entry", user),
            }
            if let JoinOutcome::Matched { battle_id, .. } = outcome {
                assert_eq!(status.battle_id, Some(*battle_id));
            }
        }
    }

    /// Queue store that holds the first two `find_active` lookups for one user
    /// until both have been made.
    struct GatedQueue {
        inner: Arc<MemoryStore>,
        user_id: &'static str,
        gate: Barrier,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl QueueStore for GatedQueue {
        async fn find_active(&self, user_id: &str) -> StoreResult<Option<QueueEntry>> {
            let found = self.inner.find_active(user_id).await?;
            if user_id == self.user_id && self.lookups.fetch_add(1, Ordering::SeqCst) < 2 {
                self.gate.wait().await;
            }
            Ok(found)
        }

        async fn oldest_waiting(&self, except_user: &str) -> StoreResult<Option<QueueEntry>> {
            self.inner.oldest_waiting(except_user).await
        }

        async fn insert(&self, entry: &QueueEntry) -> StoreResult<InsertOutcome> {
            self.inner.insert(entry).await
        }

        async fn claim(
            &self,
            entry_id: Uuid,
            battle_id: BattleId,
            claimer: &str,
        ) -> StoreResult<bool> {
            self.inner.claim(entry_id, battle_id, claimer).await
        }

        async fn release(&self, entry_id: Uuid) -> StoreResult<()> {
            self.inner.release(entry_id).await
        }

        async fn open_reserved(&self, entry_id: Uuid) -> StoreResult<bool> {
            self.inner.open_reserved(entry_id).await
        }

        async fn seat_reserved(
            &self,
            entry_id: Uuid,
            battle_id: BattleId,
            opponent: &str,
        ) -> StoreResult<bool> {
            self.inner.seat_reserved(entry_id, battle_id, opponent).await
        }

        async fn discard(&self, entry_id: Uuid) -> StoreResult<()> {
            self.inner.discard(entry_id).await
        }

        async fn remove(&self, user_id: &str) -> StoreResult<bool> {
            self.inner.remove(user_id).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_joins_by_one_user_pair_once() {
        let store = Arc::new(MemoryStore::new());
        let gated = Arc::new(GatedQueue {
            inner: store.clone(),
            user_id: "user-x",
            gate: Barrier::new(2),
            lookups: AtomicUsize::new(0),
        });
        let queue = MatchmakingQueue::new(gated, create_test_service(store.clone()));

        assert_eq!(queue.join(&caller("user-1"), "tauros").await.unwrap(), JoinOutcome::Queued);

        let joiner = caller("user-x");
        let (first, second) = tokio::join!(
            queue.join(&joiner, "snorlax"),
            queue.join(&joiner, "snorlax")
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let battles = store.list(&BattleFilter::default()).await.unwrap();
        assert_eq!(battles.total, 1);
        let battle_id = battles.items[0].battle_id;
        for outcome in &outcomes {
            if let JoinOutcome::Matched { battle_id: matched, .. } = outcome {
                assert_eq!(*matched, battle_id);
            }
        }
        assert!(outcomes.iter().any(|outcome| matches!(outcome, JoinOutcome::Matched { .. })));

        let status = queue.check(&joiner).await.unwrap();
        assert_eq!(status.status, Some(QueueEntryStatus::Matched));
        assert_eq!(status.battle_id, Some(battle_id));

        // Nobody is left waiting.
        assert_eq!(queue.join(&caller("user-2"), "tauros").await.unwrap(), JoinOutcome::Queued);
    }

    #[tokio::test]
    async fn test_abandoned_reservation_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let queue = matchmaking(store.clone());

        let fresh = QueueEntry::pairing("user-1", "Ash", "pikachu", current_timestamp());
        store.insert(&fresh).await.unwrap();
        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);
        assert_eq!(store.find_active("user-1").await.unwrap().unwrap().id, fresh.id);
        store.discard(fresh.id).await.unwrap();

        let old = QueueEntry::pairing("user-1", "Ash", "pikachu", 1);
        store.insert(&old).await.unwrap();
        assert_eq!(queue.join(&caller("user-1"), "pikachu").await.unwrap(), JoinOutcome::Queued);
        let entry = store.find_active("user-1").await.unwrap().unwrap();
        assert_ne!(entry.id, old.id);
        assert_eq!(entry.status, QueueEntryStatus::Waiting);
    }
}
