#[cfg(test)]
mod tests {
    use crate::battle::service::{BattleService, Caller};
    use crate::battle::state::{Battle, BattleId, BattleSummary, TurnLogEntry};
    use crate::battle::tests::common::{
        caller, create_test_service, predictable_rng, test_catalog, test_species_source,
    };
    use crate::config::RankingConfig;
    use crate::errors::{ArenaError, StoreResult};
    use crate::ranking::RankingService;
    use crate::store::{BattleFilter, BattleStore, MemoryStore, Page, StatsStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use schema::{BattleMode, BattleStatus, Side};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    async fn start_pvp(service: &BattleService) -> BattleId {
        let catalog = service.catalog();
        let waiting = catalog.derive_combatant("tauros", "user-1", "Red").await.unwrap();
        let joiner = catalog.derive_combatant("snorlax", "user-2", "Blue").await.unwrap();
        service
            .init_pvp_battle(BattleId::new(), waiting, joiner)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_ai_battle_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store.clone());
        let player = caller("user-1");

        let view = service.init_ai_battle(&player, "tauros", "snorlax").await.unwrap();
        assert_eq!(view.mode, BattleMode::Ai);
        assert_eq!(view.players[0].max_hp, 100);
        assert_eq!(view.messages, vec!["Tauros vs Snorlax!", "Battle begins!"]);
        assert!(view.players[1].attacks.is_none());

        let report = service.resolve_turn(view.battle_id, &player, 2).await.unwrap();
        assert_eq!(report.player2_hp, 50);
        // The computer answers with Heavy Strike (70) on a 0.5 roll.
        assert_eq!(report.player1_hp, 30);
        assert_eq!(report.turn_number, 2);
        assert_eq!(report.current_turn, Some(Side::Player1));

        let report = service.resolve_turn(view.battle_id, &player, 2).await.unwrap();
        assert_eq!(report.status, BattleStatus::Player1Won);
        assert_eq!(report.turn_number, 3);
        assert_eq!(report.actions.len(), 1);

        let stored = store.load(view.battle_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BattleStatus::Player1Won);
        assert!(stored.ratings_applied);
        assert_eq!(service.turn_log(view.battle_id, &player).await.unwrap().len(), 3);

        let stats = store.load_stats("user-1").await.unwrap().unwrap();
        assert_eq!((stats.total_battles, stats.wins, stats.rating), (1, 1, 1000));
        assert_eq!(stats.species_usage.get("tauros"), Some(&1));
    }

    #[tokio::test]
    async fn test_finished_battle_rejects_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store.clone());
        let player = caller("user-1");
        let view = service.init_ai_battle(&player, "tauros", "snorlax").await.unwrap();
        service.forfeit(view.battle_id, &player).await.unwrap();
        let before = serde_json::to_value(store.load(view.battle_id).await.unwrap()).unwrap();

        let result = service.resolve_turn(view.battle_id, &player, 1).await;
        assert!(matches!(
            result,
            Err(ArenaError::InvalidState(BattleStatus::Player2Won))
        ));
        let result = service.forfeit(view.battle_id, &player).await;
        assert!(matches!(result, Err(ArenaError::InvalidState(_))));

        let after = serde_json::to_value(store.load(view.battle_id).await.unwrap()).unwrap();
        assert_eq!(before, after);
        let stats = store.load_stats("user-1").await.unwrap().unwrap();
        assert_eq!((stats.total_battles, stats.losses), (1, 1));
    }

    #[tokio::test]
    async fn test_pvp_battle_updates_both_players_once() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store.clone());
        let battle_id = start_pvp(&service).await;
        let (red, blue) = (caller("user-1"), caller("user-2"));

        let result = service.resolve_turn(battle_id, &blue, 1).await;
        assert!(matches!(result, Err(ArenaError::NotYourTurn)));

        service.resolve_turn(battle_id, &red, 2).await.unwrap();
        let report = service.resolve_turn(battle_id, &blue, 2).await.unwrap();
        assert_eq!(report.player1_hp, 50);
        let report = service.resolve_turn(battle_id, &red, 2).await.unwrap();
        assert_eq!(report.status, BattleStatus::Player1Won);
        assert_eq!(report.current_turn, None);

        assert!(service.forfeit(battle_id, &blue).await.is_err());

        let red_stats = store.load_stats("user-1").await.unwrap().unwrap();
        let blue_stats = store.load_stats("user-2").await.unwrap().unwrap();
        assert_eq!((red_stats.total_battles, red_stats.rating), (1, 1016));
        assert_eq!((blue_stats.total_battles, blue_stats.rating), (1, 984));
    }

    #[tokio::test]
    async fn test_pvp_forfeit_by_player_two() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store.clone());
        let battle_id = start_pvp(&service).await;

        // Forfeit is allowed out of turn.
        let report = service.forfeit(battle_id, &caller("user-2")).await.unwrap();
        assert_eq!(report.status, BattleStatus::Player1Won);
        assert_eq!(report.winner, Some(Side::Player1));

        let winner = store.load_stats("user-1").await.unwrap().unwrap();
        let loser = store.load_stats("user-2").await.unwrap().unwrap();
        assert_eq!((winner.total_battles, winner.wins), (1, 1));
        assert_eq!((loser.total_battles, loser.losses), (1, 1));
    }

    #[tokio::test]
    async fn test_authorization() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store);
        let battle_id = start_pvp(&service).await;

        let anonymous = Caller::new("  ", "");
        assert!(matches!(
            service.resolve_turn(battle_id, &anonymous, 1).await,
            Err(ArenaError::Unauthenticated)
        ));
        assert!(matches!(
            service.battle_view(battle_id, &caller("user-3")).await,
            Err(ArenaError::Unauthorized(_))
        ));
        assert!(matches!(
            service.resolve_turn(BattleId::new(), &caller("user-1"), 1).await,
            Err(ArenaError::NotFound(_))
        ));
        assert!(matches!(
            service.resolve_turn(battle_id, &caller("user-1"), 7).await,
            Err(ArenaError::InvalidMove(7))
        ));

        let view = service.battle_view(battle_id, &caller("user-2")).await.unwrap();
        assert_eq!(view.viewer, Some(Side::Player2));
        assert!(view.players[0].attacks.is_none());
        assert_eq!(view.players[1].attacks.as_ref().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_ai_seat_cannot_be_used_as_caller() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store);
        let view = service
            .init_ai_battle(&caller("user-1"), "pikachu", "charmander")
            .await
            .unwrap();
        assert!(matches!(
            service.forfeit(view.battle_id, &caller("ai")).await,
            Err(ArenaError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_species_on_init() {
        let service = create_test_service(Arc::new(MemoryStore::new()));
        let result = service.init_ai_battle(&caller("user-1"), "tauros", "agumon").await;
        assert!(matches!(result, Err(ArenaError::NotFound(_))));
        let result = service.init_ai_battle(&caller("user-1"), "", "snorlax").await;
        assert!(matches!(result, Err(ArenaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_history_lists_participant_battles() {
        let store = Arc::new(MemoryStore::new());
        let service = create_test_service(store);
        start_pvp(&service).await;
        service.init_ai_battle(&caller("user-1"), "pikachu", "snorlax").await.unwrap();

        let page = service.history(&BattleFilter::for_user("user-1")).await.unwrap();
        assert_eq!(page.total, 2);
        let page = service.history(&BattleFilter::for_user("user-2")).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].mode, BattleMode::Pvp);
    }

    /// Lets another writer commit between the service's load and save.
    struct RacingStore {
        inner: MemoryStore,
        interfere: AtomicBool,
    }

    #[async_trait]
    impl BattleStore for RacingStore {
        async fn create(&self, battle: &Battle) -> StoreResult<BattleId> {
            self.inner.create(battle).await
        }

        async fn load(&self, id: BattleId) -> StoreResult<Option<Battle>> {
            self.inner.load(id).await
        }

        async fn save(&self, battle: &Battle, expected_turn: u32) -> StoreResult<()> {
            if self.interfere.swap(false, Ordering::SeqCst) {
                if let Some(mut other) = self.inner.load(battle.id).await? {
                    other.turn_number += 1;
                    other.current_turn = Some(Side::Player2);
                    self.inner.save(&other, expected_turn).await?;
                }
            }
            self.inner.save(battle, expected_turn).await
        }

        async fn finalize(&self, id: BattleId, status: BattleStatus) -> StoreResult<bool> {
            self.inner.finalize(id, status).await
        }

        async fn record_turns(&self, id: BattleId, entries: &[TurnLogEntry]) -> StoreResult<()> {
            self.inner.record_turns(id, entries).await
        }

        async fn turn_log(&self, id: BattleId) -> StoreResult<Vec<TurnLogEntry>> {
            self.inner.turn_log(id).await
        }

        async fn list(&self, filter: &BattleFilter) -> StoreResult<Page<BattleSummary>> {
            self.inner.list(filter).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_is_a_retryable_conflict() {
        let battles = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            interfere: AtomicBool::new(false),
        });
        let stats = Arc::new(MemoryStore::new());
        let ranking = RankingService::new(stats, RankingConfig::default());
        let service = BattleService::new(
            battles.clone(),
            test_catalog(Arc::new(test_species_source())),
            ranking,
        )
        .with_rng_factory(predictable_rng);

        let battle_id = start_pvp(&service).await;
        battles.interfere.store(true, Ordering::SeqCst);

        let err = service
            .resolve_turn(battle_id, &caller("user-1"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ArenaError::Conflict));
        assert!(err.is_retryable());

        // Only the interfering write landed: nobody took damage.
        let stored = battles.load(battle_id).await.unwrap().unwrap();
        assert_eq!(stored.turn_number, 1);
        assert_eq!(stored.players[1].current_hp, stored.players[1].max_hp);
    }
}
