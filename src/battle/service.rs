use crate::battle::ai::{Behavior, RandomAI};
use crate::battle::engine;
use crate::battle::state::{
    current_timestamp, Battle, BattleId, BattleSummary, BattleView, Combatant, TurnLogEntry,
    TurnReport, TurnRng, AI_USER_ID,
};
use crate::errors::{ArenaError, ArenaResult};
use crate::ranking::RankingService;
use crate::species::SpeciesCatalog;
use crate::store::{BattleFilter, BattleStore, Page};
use schema::{BattleMode, Side};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Display name of the computer opponent.
pub const AI_DISPLAY_NAME: &str = "Computer";

/// Identity of the user making a request, as established by the caller's
/// authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub display_name: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// The trimmed user id; an empty id means nobody is signed in.
    pub fn authenticated(&self) -> ArenaResult<&str> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(ArenaError::Unauthenticated);
        }
        Ok(user_id)
    }

    pub fn display_name(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() {
            "Player"
        } else {
            name
        }
    }
}

pub type RngFactory = Arc<dyn Fn() -> TurnRng + Send + Sync>;

/// Request-level orchestration around the pure engine.
///
/// Every mutating call follows the same steps: load, authorize, run the
/// engine on a copy, then write the copy back conditioned on the turn counter
/// that was read. A request the engine rejects never writes.
#[derive(Clone)]
pub struct BattleService {
    battles: Arc<dyn BattleStore>,
    catalog: SpeciesCatalog,
    ranking: RankingService,
    ai: Arc<dyn Behavior>,
    rng_factory: RngFactory,
}

impl BattleService {
    pub fn new(
        battles: Arc<dyn BattleStore>,
        catalog: SpeciesCatalog,
        ranking: RankingService,
    ) -> Self {
        Self {
            battles,
            catalog,
            ranking,
            ai: Arc::new(RandomAI::new()),
            rng_factory: Arc::new(TurnRng::new_random),
        }
    }

    pub fn with_ai(mut self, ai: Arc<dyn Behavior>) -> Self {
        self.ai = ai;
        self
    }

    pub fn with_rng_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> TurnRng + Send + Sync + 'static,
    {
        self.rng_factory = Arc::new(factory);
        self
    }

    pub fn catalog(&self) -> &SpeciesCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn BattleStore> {
        &self.battles
    }

    /// Starts a battle between the caller and the computer.
    pub async fn init_ai_battle(
        &self,
        caller: &Caller,
        player_species: &str,
        opponent_species: &str,
    ) -> ArenaResult<BattleView> {
        let user_id = caller.authenticated()?;
        if player_species.trim().is_empty() || opponent_species.trim().is_empty() {
            return Err(ArenaError::validation(
                "player and opponent species are required",
            ));
        }

        let (player, opponent) = futures_util::try_join!(
            self.catalog
                .derive_combatant(player_species, user_id, caller.display_name()),
            self.catalog
                .derive_combatant(opponent_species, AI_USER_ID, AI_DISPLAY_NAME),
        )?;

        let battle = engine::start_battle(
            BattleId::new(),
            player,
            opponent,
            BattleMode::Ai,
            current_timestamp(),
        );
        self.battles.create(&battle).await?;

        info!(
            battle_id = %battle.id,
            user_id = %user_id,
            player = %battle.players[0].species_name,
            opponent = %battle.players[1].species_name,
            "AI battle created"
        );
        Ok(battle.view_for(Some(Side::Player1)))
    }

    /// Creates a PvP battle under a pre-allocated id. The waiting user sits in
    /// player 1 and acts first.
    pub async fn init_pvp_battle(
        &self,
        id: BattleId,
        waiting: Combatant,
        joiner: Combatant,
    ) -> ArenaResult<Battle> {
        let battle =
            engine::start_battle(id, waiting, joiner, BattleMode::Pvp, current_timestamp());
        self.battles.create(&battle).await?;

        info!(
            battle_id = %battle.id,
            player1 = %battle.players[0].user_id,
            player2 = %battle.players[1].user_id,
            "PvP battle created"
        );
        Ok(battle)
    }

    /// Applies the caller's move and, in AI mode, the computer's reply.
    pub async fn resolve_turn(
        &self,
        battle_id: BattleId,
        caller: &Caller,
        move_id: u8,
    ) -> ArenaResult<TurnReport> {
        let (stored, side) = self.load_for(battle_id, caller).await?;
        let expected_turn = stored.turn_number;

        let mut battle = stored;
        let report = {
            let mut rng = (self.rng_factory)();
            engine::resolve_turn(
                &mut battle,
                side,
                move_id,
                &mut rng,
                self.ai.as_ref(),
                current_timestamp(),
            )?
        };

        self.battles.save(&battle, expected_turn).await?;
        info!(
            battle_id = %battle_id,
            user_id = %battle.combatant(side).user_id,
            turn = battle.turn_number,
            status = %battle.status,
            "Turn resolved"
        );

        self.after_commit(&battle, &report.actions).await;
        Ok(report)
    }

    /// Ends the battle in favour of the caller's opponent.
    pub async fn forfeit(&self, battle_id: BattleId, caller: &Caller) -> ArenaResult<TurnReport> {
        let (stored, side) = self.load_for(battle_id, caller).await?;
        let expected_turn = stored.turn_number;

        let mut battle = stored;
        let report = engine::forfeit(&mut battle, side, current_timestamp())?;

        self.battles.save(&battle, expected_turn).await?;
        info!(
            battle_id = %battle_id,
            user_id = %battle.combatant(side).user_id,
            status = %battle.status,
            "Battle forfeited"
        );

        self.after_commit(&battle, &report.actions).await;
        Ok(report)
    }

    /// Client-safe projection of the battle for one of its participants.
    pub async fn battle_view(
        &self,
        battle_id: BattleId,
        caller: &Caller,
    ) -> ArenaResult<BattleView> {
        let (battle, side) = self.load_for(battle_id, caller).await?;
        Ok(battle.view_for(Some(side)))
    }

    pub async fn history(&self, filter: &BattleFilter) -> ArenaResult<Page<BattleSummary>> {
        Ok(self.battles.list(filter).await?)
    }

    pub async fn turn_log(
        &self,
        battle_id: BattleId,
        caller: &Caller,
    ) -> ArenaResult<Vec<TurnLogEntry>> {
        self.load_for(battle_id, caller).await?;
        Ok(self.battles.turn_log(battle_id).await?)
    }

    async fn load_for(&self, battle_id: BattleId, caller: &Caller) -> ArenaResult<(Battle, Side)> {
        let user_id = caller.authenticated()?;
        let battle = self
            .battles
            .load(battle_id)
            .await?
            .ok_or_else(|| ArenaError::battle_not_found(battle_id))?;

        // The computer seat is never a valid caller.
        let side = match battle.side_of(user_id) {
            Some(side) if !battle.combatant(side).is_ai() => side,
            _ => return Err(ArenaError::Unauthorized(user_id.to_string())),
        };
        Ok((battle, side))
    }

    /// Side effects of a committed write. Failures here are logged and
    /// swallowed; the battle itself is already saved.
    async fn after_commit(&self, battle: &Battle, actions: &[TurnLogEntry]) {
        if !actions.is_empty() {
            if let Err(err) = self.battles.record_turns(battle.id, actions).await {
                warn!(battle_id = %battle.id, error = %err, "Failed to record turn log");
            }
        }

        if !battle.status.is_terminal() {
            return;
        }

        match self.battles.finalize(battle.id, battle.status).await {
            Ok(true) => {
                info!(
                    battle_id = %battle.id,
                    status = %battle.status,
                    winner = ?battle.winner_user_id(),
                    "Battle finished"
                );
                if let Err(err) = self.ranking.finalize(battle).await {
                    warn!(battle_id = %battle.id, error = %err, "Failed to update stats");
                }
            }
            Ok(false) => debug!(battle_id = %battle.id, "Stats already applied"),
            Err(err) => warn!(battle_id = %battle.id, error = %err, "Failed to finalize battle"),
        }
    }
}
