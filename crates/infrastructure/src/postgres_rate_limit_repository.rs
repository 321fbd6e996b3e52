//! PostgreSQL-backed rate limit repository using the `rate_limit_records` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use gatekeep_application::RateLimitRepository;
use gatekeep_core::{AppError, AppResult};
use gatekeep_domain::{RateLimitCheck, RateLimitDecision, RateLimitKey, RateLimitRecord};

/// PostgreSQL implementation of the rate limit repository port.
#[derive(Clone)]
pub struct PostgresRateLimitRepository {
    pool: PgPool,
}

impl PostgresRateLimitRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(
        transaction: &mut Transaction<'_, Postgres>,
        record: &RateLimitRecord,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_limit_records (
                identifier,
                action,
                attempts,
                window_start,
                window_end,
                blocked_until,
                escalation_level,
                total_violations,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (identifier, action) DO UPDATE
            SET
                attempts = EXCLUDED.attempts,
                window_start = EXCLUDED.window_start,
                window_end = EXCLUDED.window_end,
                blocked_until = EXCLUDED.blocked_until,
                escalation_level = EXCLUDED.escalation_level,
                total_violations = EXCLUDED.total_violations,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.identifier.as_str())
        .bind(record.action.as_str())
        .bind(to_column(record.attempts, "attempts")?)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(record.blocked_until)
        .bind(to_column(record.escalation_level, "escalation_level")?)
        .bind(to_column(record.total_violations, "total_violations")?)
        .bind(record.updated_at)
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to persist rate limit record for action '{}': {error}",
                record.action
            ))
        })?;

        Ok(())
    }
}

#[async_trait]
impl RateLimitRepository for PostgresRateLimitRepository {
    async fn find(&self, key: &RateLimitKey) -> AppResult<Option<RateLimitRecord>> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT
                identifier,
                action,
                attempts,
                window_start,
                window_end,
                blocked_until,
                escalation_level,
                total_violations,
                updated_at
            FROM rate_limit_records
            WHERE identifier = $1 AND action = $2
            "#,
        )
        .bind(key.identifier())
        .bind(key.action())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to load rate limit record for action '{}': {error}",
                key.action()
            ))
        })?;

        row.map(RateLimitRow::into_record).transpose()
    }

    async fn apply_check(&self, check: &RateLimitCheck) -> AppResult<RateLimitDecision> {
        let key = check.key();
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!(
                "failed to start rate limit transaction for action '{}': {error}",
                key.action()
            ))
        })?;

        // Serializes first checks on a key that has no row to lock yet.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.to_string())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to lock rate limit key for action '{}': {error}",
                    key.action()
                ))
            })?;

        let existing = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT
                identifier,
                action,
                attempts,
                window_start,
                window_end,
                blocked_until,
                escalation_level,
                total_violations,
                updated_at
            FROM rate_limit_records
            WHERE identifier = $1 AND action = $2
            FOR UPDATE
            "#,
        )
        .bind(key.identifier())
        .bind(key.action())
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to load rate limit record for action '{}': {error}",
                key.action()
            ))
        })?
        .map(RateLimitRow::into_record)
        .transpose()?;

        let outcome = check.evaluate(existing.as_ref());
        if let Some(record) = outcome.record.as_ref() {
            Self::upsert(&mut transaction, record).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!(
                "failed to commit rate limit transaction for action '{}': {error}",
                key.action()
            ))
        })?;

        Ok(outcome.decision)
    }

    async fn delete(&self, key: &RateLimitKey) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM rate_limit_records
            WHERE identifier = $1 AND action = $2
            "#,
        )
        .bind(key.identifier())
        .bind(key.action())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to reset rate limit record for action '{}': {error}",
                key.action()
            ))
        })?;

        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limit_records
            WHERE updated_at < $1
              AND window_end < $1
              AND (blocked_until IS NULL OR blocked_until < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!("failed to delete stale rate limit records: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct RateLimitRow {
    identifier: String,
    action: String,
    attempts: i32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
    escalation_level: i32,
    total_violations: i32,
    updated_at: DateTime<Utc>,
}

impl RateLimitRow {
    fn into_record(self) -> AppResult<RateLimitRecord> {
        Ok(RateLimitRecord {
            attempts: from_column(self.attempts, "attempts")?,
            escalation_level: from_column(self.escalation_level, "escalation_level")?,
            total_violations: from_column(self.total_violations, "total_violations")?,
            identifier: self.identifier,
            action: self.action,
            window_start: self.window_start,
            window_end: self.window_end,
            blocked_until: self.blocked_until,
            updated_at: self.updated_at,
        })
    }
}

fn to_column(value: u32, column: &str) -> AppResult<i32> {
    i32::try_from(value).map_err(|error| {
        AppError::Store(format!("rate limit {column} value {value} is out of range: {error}"))
    })
}

fn from_column(value: i32, column: &str) -> AppResult<u32> {
    u32::try_from(value).map_err(|error| {
        AppError::Store(format!("stored rate limit {column} value {value} is invalid: {error}"))
    })
}

#[cfg(test)]
mod tests;
