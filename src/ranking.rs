//! Per-user battle statistics and ELO ratings.

use crate::battle::state::Battle;
use crate::config::RankingConfig;
use crate::errors::{ArenaError, ArenaResult, StoreError};
use crate::store::StatsStore;
use schema::{BattleMode, BattleStatus, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Attempts at the conditional stats write before giving up.
const MAX_SAVE_ATTEMPTS: usize = 3;

/// Probability of `rating` scoring against `opponent_rating`.
pub fn expected_score(rating: i32, opponent_rating: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - rating) as f64 / 400.0))
}

/// Rating delta for one result: `round(k * (score - expected))`.
pub fn rating_change(rating: i32, opponent_rating: i32, score: f64, k_factor: f64) -> i32 {
    (k_factor * (score - expected_score(rating, opponent_rating))).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    pub fn score(&self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
            Outcome::Draw => 0.5,
        }
    }

    /// Result of a finished battle from one side's point of view. Draws and
    /// abandoned battles are both draws.
    pub fn for_side(status: BattleStatus, side: Side) -> Option<Outcome> {
        match status {
            BattleStatus::Active => None,
            BattleStatus::Draw | BattleStatus::Abandoned => Some(Outcome::Draw),
            won => Some(if won.winner() == Some(side) {
                Outcome::Win
            } else {
                Outcome::Loss
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserStats {
    pub user_id: String,
    pub display_name: String,
    pub total_battles: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    /// Battles fought per species name.
    pub species_usage: BTreeMap<String, u32>,
    pub rating: i32,
    pub peak_rating: i32,
    pub first_battle_at: Option<u64>,
    pub last_battle_at: Option<u64>,
}

impl UserStats {
    pub fn new(user_id: &str, display_name: &str, initial_rating: i32) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            total_battles: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            current_streak: 0,
            best_streak: 0,
            species_usage: BTreeMap::new(),
            rating: initial_rating,
            peak_rating: initial_rating,
            first_battle_at: None,
            last_battle_at: None,
        }
    }

    /// Counts one finished battle.
    pub fn record_result(&mut self, outcome: Outcome, species_name: &str, at: u64) {
        self.total_battles += 1;
        match outcome {
            Outcome::Win => {
                self.wins += 1;
                self.current_streak += 1;
                self.best_streak = self.best_streak.max(self.current_streak);
            }
            Outcome::Loss => {
                self.losses += 1;
                self.current_streak = 0;
            }
            Outcome::Draw => {
                self.draws += 1;
                self.current_streak = 0;
            }
        }

        *self
            .species_usage
            .entry(species_name.to_string())
            .or_insert(0) += 1;

        self.first_battle_at.get_or_insert(at);
        self.last_battle_at = Some(at);
    }

    pub fn apply_rating_change(&mut self, delta: i32) {
        self.rating += delta;
        self.peak_rating = self.peak_rating.max(self.rating);
    }

    /// Species with the most battles; ties go to the alphabetically first.
    pub fn most_used_species(&self) -> Option<(&str, u32)> {
        self.species_usage
            .iter()
            .fold(None, |best: Option<(&str, u32)>, (name, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((name.as_str(), *count)),
            })
    }

    /// Win percentage rounded to one decimal.
    pub fn win_rate(&self) -> f64 {
        if self.total_battles == 0 {
            return 0.0;
        }
        (self.wins as f64 / self.total_battles as f64 * 1000.0).round() / 10.0
    }
}

/// Stats of one user as shown on a profile.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserStatsView {
    pub stats: UserStats,
    pub win_rate: f64,
    pub most_used_species: Option<String>,
    pub most_used_count: u32,
    /// 1-based leaderboard position.
    pub rank: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub position: usize,
    pub user_id: String,
    pub display_name: String,
    pub rating: i32,
    pub peak_rating: i32,
    pub total_battles: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_rate: f64,
    pub best_streak: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Applies finished battles to user stats and serves rating queries.
#[derive(Clone)]
pub struct RankingService {
    store: Arc<dyn StatsStore>,
    config: RankingConfig,
}

impl RankingService {
    pub fn new(store: Arc<dyn StatsStore>, config: RankingConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Whether this finished battle moves ratings at all.
    fn is_rated(&self, battle: &Battle) -> bool {
        if battle.status == BattleStatus::Abandoned {
            return false;
        }
        match battle.mode {
            BattleMode::Pvp => true,
            BattleMode::Ai => self.config.rate_ai_battles,
        }
    }

    /// Counts a finished battle for every human participant.
    ///
    /// Rating deltas are computed from both sides' ratings before this battle.
    /// The AI side has no stats row and is scored at the configured nominal
    /// rating. Callers must make sure this runs once per battle.
    pub async fn finalize(&self, battle: &Battle) -> ArenaResult<()> {
        if !battle.status.is_terminal() {
            return Err(ArenaError::InvalidState(battle.status));
        }

        let mut pre_battle = [self.config.ai_rating; 2];
        for side in [Side::Player1, Side::Player2] {
            let combatant = battle.combatant(side);
            if !combatant.is_ai() {
                pre_battle[side.index()] = self
                    .store
                    .load_stats(&combatant.user_id)
                    .await?
                    .map(|stats| stats.rating)
                    .unwrap_or(self.config.initial_rating);
            }
        }

        let rated = self.is_rated(battle);
        let at = battle.finished_at.unwrap_or(battle.started_at);

        // Participants are recorded independently of each other.
        let mut failures = Vec::new();
        for side in [Side::Player1, Side::Player2] {
            let combatant = battle.combatant(side);
            if combatant.is_ai() {
                continue;
            }
            let Some(outcome) = Outcome::for_side(battle.status, side) else {
                continue;
            };

            let delta = if rated {
                rating_change(
                    pre_battle[side.index()],
                    pre_battle[side.opponent().index()],
                    outcome.score(),
                    self.config.k_factor,
                )
            } else {
                0
            };

            let recorded = self
                .record_with_retry(
                    &combatant.user_id,
                    &combatant.display_name,
                    &combatant.species_name,
                    outcome,
                    delta,
                    at,
                )
                .await;

            match recorded {
                Ok(stats) => info!(
                    battle_id = %battle.id,
                    user_id = %combatant.user_id,
                    outcome = ?outcome,
                    rating_change = delta,
                    rating = stats.rating,
                    "Stats updated"
                ),
                Err(err) => {
                    warn!(
                        battle_id = %battle.id,
                        user_id = %combatant.user_id,
                        error = %err,
                        "Failed to update stats"
                    );
                    failures.push((combatant.user_id.clone(), err));
                }
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).1),
            _ => Err(ArenaError::Persistence(
                failures
                    .iter()
                    .map(|(user_id, err)| format!("{}: {}", user_id, err))
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    async fn record_with_retry(
        &self,
        user_id: &str,
        display_name: &str,
        species_name: &str,
        outcome: Outcome,
        delta: i32,
        at: u64,
    ) -> ArenaResult<UserStats> {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let current = self.store.load_stats(user_id).await?;
            let expected_total = current.as_ref().map(|stats| stats.total_battles).unwrap_or(0);

            let mut stats = current.unwrap_or_else(|| {
                UserStats::new(user_id, display_name, self.config.initial_rating)
            });
            stats.display_name = display_name.to_string();
            stats.record_result(outcome, species_name, at);
            stats.apply_rating_change(delta);

            match self.store.save_stats(&stats, expected_total).await {
                Ok(()) => return Ok(stats),
                Err(StoreError::Conflict) => {
                    warn!(user_id = %user_id, attempt, "Stats write lost a race, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ArenaError::Conflict)
    }

    /// Stats, win rate and leaderboard position. `Ok(None)` for a user who
    /// has never finished a battle.
    pub async fn user_stats(&self, user_id: &str) -> ArenaResult<Option<UserStatsView>> {
        if user_id.trim().is_empty() {
            return Err(ArenaError::validation("user id is required"));
        }

        let Some(stats) = self.store.load_stats(user_id).await? else {
            return Ok(None);
        };
        let rank = self.store.count_rated_above(stats.rating).await? + 1;
        let (most_used_species, most_used_count) = stats
            .most_used_species()
            .map(|(name, count)| (Some(name.to_string()), count))
            .unwrap_or((None, 0));

        Ok(Some(UserStatsView {
            win_rate: stats.win_rate(),
            most_used_species,
            most_used_count,
            rank,
            stats,
        }))
    }

    /// Ranked users ordered by rating. `limit` defaults to 10 and is capped
    /// at 100.
    pub async fn leaderboard(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> ArenaResult<Leaderboard> {
        let limit = limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);

        let total = self.store.count_ranked().await?;
        let rows = self.store.leaderboard(offset, limit).await?;

        let entries: Vec<LeaderboardEntry> = rows
            .into_iter()
            .enumerate()
            .map(|(i, stats)| LeaderboardEntry {
                position: offset + i + 1,
                win_rate: stats.win_rate(),
                user_id: stats.user_id,
                display_name: stats.display_name,
                rating: stats.rating,
                peak_rating: stats.peak_rating,
                total_battles: stats.total_battles,
                wins: stats.wins,
                losses: stats.losses,
                draws: stats.draws,
                best_streak: stats.best_streak,
            })
            .collect();

        Ok(Leaderboard {
            has_more: offset + entries.len() < total,
            entries,
            total,
            offset,
            limit,
        })
    }
}
