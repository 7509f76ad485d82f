//! Durable store backed by Postgres.
//!
//! Battle state is kept as JSONB next to the scalar columns the conditional
//! writes and history filters need. The schema lives in `migrations/`.

use crate::battle::state::{Battle, BattleId, BattleSummary, TurnLogEntry};
use crate::errors::{StoreError, StoreResult};
use crate::ranking::UserStats;
use crate::store::{
    BattleFilter, BattleStore, InsertOutcome, Page, QueueEntry, QueueEntryStatus, QueueStore,
    StatsStore,
};
use async_trait::async_trait;
use schema::BattleStatus;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::info;
use uuid::Uuid;

const QUEUE_COLUMNS: &str =
    "id, user_id, display_name, species_ref, status, battle_id, matched_with, joined_at";

const STATS_COLUMNS: &str = "user_id, display_name, total_battles, wins, losses, draws, \
     current_streak, best_streak, species_usage, rating, peak_rating, \
     first_battle_at, last_battle_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a connection pool and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn stored_status(&self, id: BattleId) -> StoreResult<Option<BattleStatus>> {
        let row = sqlx::query("SELECT status FROM battles WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| parse_status(&row.try_get::<String, _>("status")?))
            .transpose()
    }
}

fn parse_status(value: &str) -> StoreResult<BattleStatus> {
    BattleStatus::parse(value)
        .ok_or_else(|| StoreError::CorruptedData(format!("unknown battle status '{}'", value)))
}

fn battle_from_row(row: &PgRow) -> StoreResult<Battle> {
    let state: serde_json::Value = row.try_get("state")?;
    let mut battle: Battle = serde_json::from_value(state)?;
    battle.ratings_applied = row.try_get("ratings_applied")?;
    Ok(battle)
}

fn queue_entry_from_row(row: &PgRow) -> StoreResult<QueueEntry> {
    let status: String = row.try_get("status")?;
    let status = QueueEntryStatus::parse(&status)
        .ok_or_else(|| StoreError::CorruptedData(format!("unknown queue status '{}'", status)))?;
    let battle_id: Option<Uuid> = row.try_get("battle_id")?;
    let joined_at: i64 = row.try_get("joined_at")?;

    Ok(QueueEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        display_name: row.try_get("display_name")?,
        species_ref: row.try_get("species_ref")?,
        status,
        battle_id: battle_id.map(BattleId),
        matched_with: row.try_get("matched_with")?,
        joined_at: joined_at as u64,
    })
}

fn stats_from_row(row: &PgRow) -> StoreResult<UserStats> {
    let count = |column: &str| -> StoreResult<u32> {
        Ok(row.try_get::<i32, _>(column)?.max(0) as u32)
    };
    let timestamp = |column: &str| -> StoreResult<Option<u64>> {
        Ok(row.try_get::<Option<i64>, _>(column)?.map(|value| value as u64))
    };
    let usage: serde_json::Value = row.try_get("species_usage")?;

    Ok(UserStats {
        user_id: row.try_get("user_id")?,
        display_name: row.try_get("display_name")?,
        total_battles: count("total_battles")?,
        wins: count("wins")?,
        losses: count("losses")?,
        draws: count("draws")?,
        current_streak: count("current_streak")?,
        best_streak: count("best_streak")?,
        species_usage: serde_json::from_value(usage)?,
        rating: row.try_get("rating")?,
        peak_rating: row.try_get("peak_rating")?,
        first_battle_at: timestamp("first_battle_at")?,
        last_battle_at: timestamp("last_battle_at")?,
    })
}

/// Binds `$1..$13` in `STATS_COLUMNS` order.
fn bind_stats<'q>(
    query: Query<'q, Postgres, PgArguments>,
    stats: &'q UserStats,
    usage: serde_json::Value,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(stats.user_id.as_str())
        .bind(stats.display_name.as_str())
        .bind(stats.total_battles as i32)
        .bind(stats.wins as i32)
        .bind(stats.losses as i32)
        .bind(stats.draws as i32)
        .bind(stats.current_streak as i32)
        .bind(stats.best_streak as i32)
        .bind(usage)
        .bind(stats.rating)
        .bind(stats.peak_rating)
        .bind(stats.first_battle_at.map(|at| at as i64))
        .bind(stats.last_battle_at.map(|at| at as i64))
}

#[async_trait]
impl BattleStore for PgStore {
    async fn create(&self, battle: &Battle) -> StoreResult<BattleId> {
        let state = serde_json::to_value(battle)?;
        let result = sqlx::query(
            r#"
            INSERT INTO battles
                (id, mode, status, player1_user_id, player2_user_id, turn_number, state,
                 started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(battle.id.0)
        .bind(battle.mode.as_str())
        .bind(battle.status.as_str())
        .bind(battle.players[0].user_id.as_str())
        .bind(battle.players[1].user_id.as_str())
        .bind(battle.turn_number as i32)
        .bind(state)
        .bind(battle.started_at as i64)
        .bind(battle.finished_at.map(|at| at as i64))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(battle.id)
    }

    async fn load(&self, id: BattleId) -> StoreResult<Option<Battle>> {
        let row = sqlx::query("SELECT state, ratings_applied FROM battles WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(battle_from_row).transpose()
    }

    async fn save(&self, battle: &Battle, expected_turn: u32) -> StoreResult<()> {
        let state = serde_json::to_value(battle)?;
        let result = sqlx::query(
            r#"
            UPDATE battles
            SET state = $2, status = $3, turn_number = $4, finished_at = $5, updated_at = now()
            WHERE id = $1 AND status = 'active' AND turn_number = $6
            "#,
        )
        .bind(battle.id.0)
        .bind(state)
        .bind(battle.status.as_str())
        .bind(battle.turn_number as i32)
        .bind(battle.finished_at.map(|at| at as i64))
        .bind(expected_turn as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.stored_status(battle.id).await? {
            None => Err(StoreError::Missing(format!("battle {}", battle.id))),
            Some(status) if status.is_terminal() => Err(StoreError::Closed(status)),
            Some(_) => Err(StoreError::Conflict),
        }
    }

    async fn finalize(&self, id: BattleId, status: BattleStatus) -> StoreResult<bool> {
        if !status.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE battles
            SET ratings_applied = TRUE, updated_at = now()
            WHERE id = $1 AND status = $2 AND ratings_applied = FALSE
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.stored_status(id).await? {
            None => Err(StoreError::Missing(format!("battle {}", id))),
            Some(_) => Ok(false),
        }
    }

    async fn record_turns(&self, id: BattleId, entries: &[TurnLogEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO battle_turns (battle_id, turn_number, side, entry, recorded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id.0)
            .bind(entry.turn_number as i32)
            .bind(entry.side.as_str())
            .bind(serde_json::to_value(entry)?)
            .bind(entry.recorded_at as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn turn_log(&self, id: BattleId) -> StoreResult<Vec<TurnLogEntry>> {
        let rows = sqlx::query("SELECT entry FROM battle_turns WHERE battle_id = $1 ORDER BY id")
            .bind(id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<TurnLogEntry> {
                let entry: serde_json::Value = row.try_get("entry")?;
                Ok(serde_json::from_value(entry)?)
            })
            .collect()
    }

    async fn list(&self, filter: &BattleFilter) -> StoreResult<Page<BattleSummary>> {
        let limit = filter.effective_limit();
        let user_id = filter.user_id.as_deref();
        let status = filter.status.map(|status| status.as_str());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM battles
            WHERE ($1::text IS NULL OR player1_user_id = $1 OR player2_user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(
            r#"
            SELECT state, ratings_applied FROM battles
            WHERE ($1::text IS NULL OR player1_user_id = $1 OR player2_user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY started_at DESC, updated_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(limit as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| battle_from_row(row).map(|battle| battle.summary()))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Page::new(items, total.max(0) as usize, filter.offset, limit))
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn find_active(&self, user_id: &str) -> StoreResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM matchmaking_queue
            WHERE user_id = $1 AND status IN ('pairing', 'waiting', 'matched')
            LIMIT 1
            "#,
            QUEUE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn oldest_waiting(&self, except_user: &str) -> StoreResult<Option<QueueEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM matchmaking_queue
            WHERE status = 'waiting' AND user_id <> $1
            ORDER BY position LIMIT 1
            "#,
            QUEUE_COLUMNS
        ))
        .bind(except_user)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn insert(&self, entry: &QueueEntry) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO matchmaking_queue ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
            QUEUE_COLUMNS
        ))
        .bind(entry.id)
        .bind(entry.user_id.as_str())
        .bind(entry.display_name.as_str())
        .bind(entry.species_ref.as_str())
        .bind(entry.status.as_str())
        .bind(entry.battle_id.map(|id| id.0))
        .bind(entry.matched_with.as_deref())
        .bind(entry.joined_at as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }
        match self.find_active(&entry.user_id).await? {
            Some(existing) => Ok(InsertOutcome::AlreadyQueued(existing)),
            None => Err(StoreError::Conflict),
        }
    }

    async fn claim(&self, entry_id: Uuid, battle_id: BattleId, claimer: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE matchmaking_queue
            SET status = 'matched', battle_id = $2, matched_with = $3
            WHERE id = $1 AND status = 'waiting'
            "#,
        )
        .bind(entry_id)
        .bind(battle_id.0)
        .bind(claimer)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, entry_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE matchmaking_queue
            SET status = 'waiting', battle_id = NULL, matched_with = NULL
            WHERE id = $1 AND status = 'matched'
            "#,
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_reserved(&self, entry_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE matchmaking_queue SET status = 'waiting' WHERE id = $1 AND status = 'pairing'",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn seat_reserved(
        &self,
        entry_id: Uuid,
        battle_id: BattleId,
        opponent: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE matchmaking_queue
            SET status = 'matched', battle_id = $2, matched_with = $3
            WHERE id = $1 AND status = 'pairing'
            "#,
        )
        .bind(entry_id)
        .bind(battle_id.0)
        .bind(opponent)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn discard(&self, entry_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM matchmaking_queue WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM matchmaking_queue WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StatsStore for PgStore {
    async fn load_stats(&self, user_id: &str) -> StoreResult<Option<UserStats>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM user_battle_stats WHERE user_id = $1",
            STATS_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stats_from_row).transpose()
    }

    async fn save_stats(&self, stats: &UserStats, expected_total: u32) -> StoreResult<()> {
        let usage = serde_json::to_value(&stats.species_usage)?;

        let sql = if expected_total == 0 {
            format!(
                r#"
                INSERT INTO user_battle_stats ({})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (user_id) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    total_battles = EXCLUDED.total_battles,
                    wins = EXCLUDED.wins,
                    losses = EXCLUDED.losses,
                    draws = EXCLUDED.draws,
                    current_streak = EXCLUDED.current_streak,
                    best_streak = EXCLUDED.best_streak,
                    species_usage = EXCLUDED.species_usage,
                    rating = EXCLUDED.rating,
                    peak_rating = EXCLUDED.peak_rating,
                    first_battle_at = EXCLUDED.first_battle_at,
                    last_battle_at = EXCLUDED.last_battle_at
                WHERE user_battle_stats.total_battles = $14
                "#,
                STATS_COLUMNS
            )
        } else {
            r#"
            UPDATE user_battle_stats SET
                display_name = $2, total_battles = $3, wins = $4, losses = $5, draws = $6,
                current_streak = $7, best_streak = $8, species_usage = $9, rating = $10,
                peak_rating = $11, first_battle_at = $12, last_battle_at = $13
            WHERE user_id = $1 AND total_battles = $14
            "#
            .to_string()
        };

        let result = bind_stats(sqlx::query(&sql), stats, usage)
            .bind(expected_total as i32)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }

    async fn leaderboard(&self, offset: usize, limit: usize) -> StoreResult<Vec<UserStats>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM user_battle_stats
            WHERE total_battles > 0
            ORDER BY rating DESC, wins DESC, user_id ASC
            LIMIT $1 OFFSET $2
            "#,
            STATS_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stats_from_row).collect()
    }

    async fn count_ranked(&self) -> StoreResult<usize> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM user_battle_stats WHERE total_battles > 0")
                .fetch_one(&self.pool)
                .await?
                .try_get("total")?;
        Ok(total.max(0) as usize)
    }

    async fn count_rated_above(&self, rating: i32) -> StoreResult<usize> {
        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM user_battle_stats
            WHERE total_battles > 0 AND rating > $1
            "#,
        )
        .bind(rating)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;
        Ok(total.max(0) as usize)
    }
}
