//! PostgreSQL storage adapter.
//!
//! The single storage collaborator for the whole subsystem: match
//! snapshots, reminder and result-notification records, and the
//! read-only view of guild settings all go through this store.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::adapters::pandascore::ApiMatch;
use crate::cache::StatusFilter;
use crate::domain::{GuildConfig, MatchRecord, MatchStatus, Reminder, ResultNotification};
use crate::error::Result;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Reuse an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Matches ====================

    /// Insert or overwrite a match snapshot. Last write wins on conflict;
    /// the indexed status column and the stored snapshot change in the
    /// same statement, so they cannot diverge.
    pub async fn upsert_match(&self, m: &ApiMatch, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO matches (match_id, status, snapshot, begin_at, end_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (match_id) DO UPDATE SET
                status = EXCLUDED.status,
                snapshot = EXCLUDED.snapshot,
                begin_at = EXCLUDED.begin_at,
                end_at = EXCLUDED.end_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(m.id)
        .bind(m.status.as_str())
        .bind(&m.raw)
        .bind(m.begin_at)
        .bind(m.end_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_match(&self, match_id: i64) -> Result<Option<MatchRecord>> {
        let row = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches WHERE match_id = $1
            "#,
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_match).transpose()
    }

    pub async fn get_match_status(&self, match_id: i64) -> Result<Option<MatchStatus>> {
        let row = sqlx::query("SELECT status FROM matches WHERE match_id = $1")
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.get::<String, _>("status").parse::<MatchStatus>())
            .transpose()
    }

    /// Filtered match query ordered by temporal anchor. The synthetic
    /// "results" filter covers all decided statuses.
    pub async fn query_matches(
        &self,
        filter: Option<StatusFilter>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<MatchRecord>> {
        let filter_param = filter.map(|f| f.as_param().to_string());

        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            WHERE ($1::text IS NULL
                   OR status = $1
                   OR ($1 = 'results' AND status IN ('finished', 'canceled', 'postponed')))
              AND ($2::timestamptz IS NULL
                   OR COALESCE(end_at, begin_at, updated_at) >= $2)
            ORDER BY COALESCE(end_at, begin_at, updated_at) ASC
            LIMIT $3
            "#,
        )
        .bind(filter_param)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    pub async fn all_matches(&self) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    /// Running matches whose snapshot has not been re-confirmed since
    /// `older_than` — the transition detector's suspect set.
    pub async fn stale_running(&self, older_than: DateTime<Utc>) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            WHERE status = 'running' AND updated_at < $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    pub async fn delete_matches(&self, match_ids: &[i64]) -> Result<u64> {
        if match_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM matches WHERE match_id = ANY($1)")
            .bind(match_ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete matches whose temporal anchor is older than `cutoff`.
    /// COALESCE keeps any row without a derivable anchor (fail open).
    pub async fn delete_matches_outside(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM matches WHERE COALESCE(end_at, begin_at, updated_at) < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Oldest and newest temporal anchors across the store, for coverage
    /// computation. None when the store is empty.
    pub async fn anchor_bounds(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row = sqlx::query(
            r#"
            SELECT MIN(COALESCE(end_at, begin_at, updated_at)) AS oldest,
                   MAX(COALESCE(end_at, begin_at, updated_at)) AS newest
            FROM matches
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let oldest: Option<DateTime<Utc>> = row.get("oldest");
        let newest: Option<DateTime<Utc>> = row.get("newest");
        Ok(oldest.zip(newest))
    }

    pub async fn upcoming_matches(&self, limit: i64) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            WHERE status = 'not_started'
            ORDER BY begin_at ASC NULLS LAST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    pub async fn running_matches(&self, limit: i64) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            WHERE status = 'running'
            ORDER BY begin_at ASC NULLS LAST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    pub async fn recent_results(&self, limit: i64) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT match_id, status, snapshot, begin_at, end_at, updated_at
            FROM matches
            WHERE status IN ('finished', 'canceled', 'postponed')
            ORDER BY COALESCE(end_at, begin_at, updated_at) DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_match).collect()
    }

    // ==================== Reminders ====================

    /// Insert one reminder row, ignoring the conflict when the
    /// (guild, match, offset) tuple already exists. Returns whether a
    /// new row was created.
    pub async fn insert_reminder(
        &self,
        guild_id: i64,
        match_id: i64,
        offset_minutes: i32,
        scheduled_time: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO reminders (guild_id, match_id, offset_minutes, scheduled_time)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (guild_id, match_id, offset_minutes) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(guild_id)
        .bind(match_id)
        .bind(offset_minutes)
        .bind(scheduled_time)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    pub async fn pending_reminders(&self) -> Result<Vec<Reminder>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, match_id, offset_minutes, scheduled_time, sent, sent_at
            FROM reminders
            WHERE sent = FALSE
            ORDER BY scheduled_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_reminder).collect())
    }

    /// Flip a reminder to sent. The `sent = FALSE` guard makes the flip
    /// one-shot: a second call is a no-op and returns false.
    pub async fn mark_reminder_sent(&self, id: i64, when: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reminders SET sent = TRUE, sent_at = $2 WHERE id = $1 AND sent = FALSE",
        )
        .bind(id)
        .bind(when)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count of past-due reminders still pending, for the backlog gauge.
    pub async fn count_due_pending_reminders(&self, now: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM reminders WHERE sent = FALSE AND scheduled_time <= $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn oldest_due_pending_reminder(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT MIN(scheduled_time) AS oldest
            FROM reminders
            WHERE sent = FALSE AND scheduled_time <= $1
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("oldest"))
    }

    // ==================== Result notifications ====================

    pub async fn insert_result_notification(&self, guild_id: i64, match_id: i64) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO result_notifications (guild_id, match_id)
            VALUES ($1, $2)
            ON CONFLICT (guild_id, match_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(guild_id)
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    pub async fn pending_result_notifications(&self) -> Result<Vec<ResultNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, match_id, sent, sent_at
            FROM result_notifications
            WHERE sent = FALSE
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ResultNotification {
                id: row.get("id"),
                guild_id: row.get("guild_id"),
                match_id: row.get("match_id"),
                sent: row.get("sent"),
                sent_at: row.get("sent_at"),
            })
            .collect())
    }

    pub async fn mark_result_notification_sent(&self, id: i64, when: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE result_notifications SET sent = TRUE, sent_at = $2 WHERE id = $1 AND sent = FALSE",
        )
        .bind(id)
        .bind(when)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ==================== Guild configs ====================

    pub async fn get_guild_config(&self, guild_id: i64) -> Result<Option<GuildConfig>> {
        let row = sqlx::query(
            r#"
            SELECT guild_id, channel_id, reminders_enabled, results_enabled, timezone
            FROM guild_configs WHERE guild_id = $1
            "#,
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_guild_config))
    }

    pub async fn guilds_with_reminders_enabled(&self) -> Result<Vec<GuildConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id, channel_id, reminders_enabled, results_enabled, timezone
            FROM guild_configs WHERE reminders_enabled = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_guild_config).collect())
    }

    pub async fn guilds_with_results_enabled(&self) -> Result<Vec<GuildConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id, channel_id, reminders_enabled, results_enabled, timezone
            FROM guild_configs WHERE results_enabled = TRUE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_guild_config).collect())
    }

    /// Write a guild's settings. Called by the command surface only; the
    /// cache subsystem never mutates guild configs.
    pub async fn upsert_guild_config(&self, config: &GuildConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO guild_configs (guild_id, channel_id, reminders_enabled, results_enabled, timezone)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (guild_id) DO UPDATE SET
                channel_id = EXCLUDED.channel_id,
                reminders_enabled = EXCLUDED.reminders_enabled,
                results_enabled = EXCLUDED.results_enabled,
                timezone = EXCLUDED.timezone
            "#,
        )
        .bind(config.guild_id)
        .bind(config.channel_id)
        .bind(config.reminders_enabled)
        .bind(config.results_enabled)
        .bind(&config.timezone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_match(row: sqlx::postgres::PgRow) -> Result<MatchRecord> {
    let status: String = row.get("status");
    Ok(MatchRecord {
        match_id: row.get("match_id"),
        status: status.parse::<MatchStatus>()?,
        snapshot: row.get("snapshot"),
        begin_at: row.get("begin_at"),
        end_at: row.get("end_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_reminder(row: sqlx::postgres::PgRow) -> Reminder {
    Reminder {
        id: row.get("id"),
        guild_id: row.get("guild_id"),
        match_id: row.get("match_id"),
        offset_minutes: row.get("offset_minutes"),
        scheduled_time: row.get("scheduled_time"),
        sent: row.get("sent"),
        sent_at: row.get("sent_at"),
    }
}

fn row_to_guild_config(row: sqlx::postgres::PgRow) -> GuildConfig {
    GuildConfig {
        guild_id: row.get("guild_id"),
        channel_id: row.get("channel_id"),
        reminders_enabled: row.get("reminders_enabled"),
        results_enabled: row.get("results_enabled"),
        timezone: row.get("timezone"),
    }
}
