//! SQLite-backed subscription store.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

use super::{ApprovalState, PendingApproval, SubscriptionRecord};

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS subscriptions (
        subscriber_id INTEGER PRIMARY KEY,
        display_name  TEXT NOT NULL,
        start_time    TEXT NOT NULL,
        expiry_time   TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS pending_approvals (
        token         TEXT PRIMARY KEY,
        subscriber_id INTEGER NOT NULL,
        display_name  TEXT NOT NULL,
        username      TEXT,
        photo_file_id TEXT NOT NULL,
        state         TEXT NOT NULL,
        submitted_at  TEXT NOT NULL,
        decided_at    TEXT
    )
    ",
];

/// Durable store for subscriptions and pending approvals.
///
/// The pool holds a single connection, so every access is serialized.
#[derive(Debug, Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    /// Opens (creating if missing) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening subscription store at {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        Self::connect(options).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Inserts the record, replacing any existing one for the same subscriber.
    pub async fn upsert(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        debug!(
            "Upserting subscription for {} until {}",
            record.subscriber_id, record.expiry_time
        );

        sqlx::query(
            r"
            INSERT INTO subscriptions (subscriber_id, display_name, start_time, expiry_time)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(subscriber_id) DO UPDATE SET
                display_name = excluded.display_name,
                start_time   = excluded.start_time,
                expiry_time  = excluded.expiry_time
            ",
        )
        .bind(record.subscriber_id)
        .bind(&record.display_name)
        .bind(record.start_time)
        .bind(record.expiry_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the record for a subscriber.
    pub async fn get(&self, subscriber_id: i64) -> Result<Option<SubscriptionRecord>, StoreError> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            r"
            SELECT subscriber_id, display_name, start_time, expiry_time
            FROM subscriptions
            WHERE subscriber_id = ?1
            ",
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Deletes the record for a subscriber. Returns whether a row was removed.
    pub async fn delete(&self, subscriber_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ?1")
            .bind(subscriber_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes the record only if it still ends at `expiry_time`.
    ///
    /// Returns `false` when the subscriber was re-approved since the record
    /// was read, leaving the newer subscription in place.
    pub async fn delete_expired(
        &self,
        subscriber_id: i64,
        expiry_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND expiry_time = ?2",
        )
        .bind(subscriber_id)
        .bind(expiry_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists every record, soonest expiry first.
    pub async fn list_all(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let records = sqlx::query_as::<_, SubscriptionRecord>(
            r"
            SELECT subscriber_id, display_name, start_time, expiry_time
            FROM subscriptions
            ORDER BY expiry_time, subscriber_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Lists records that are expired at `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let mut records = self.list_all().await?;
        records.retain(|r| r.is_expired(now));
        Ok(records)
    }

    /// Number of stored subscriptions.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Stores a newly submitted proof.
    pub async fn insert_pending(&self, pending: &PendingApproval) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO pending_approvals
                (token, subscriber_id, display_name, username, photo_file_id, state, submitted_at, decided_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(&pending.token)
        .bind(pending.subscriber_id)
        .bind(&pending.display_name)
        .bind(pending.username.as_deref())
        .bind(&pending.photo_file_id)
        .bind(pending.state.as_str())
        .bind(pending.submitted_at)
        .bind(pending.decided_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks up a pending approval by token.
    pub async fn get_pending(&self, token: &str) -> Result<Option<PendingApproval>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT token, subscriber_id, display_name, username, photo_file_id, state, submitted_at, decided_at
            FROM pending_approvals
            WHERE token = ?1
            ",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(pending_from_row).transpose()
    }

    /// Moves a pending approval out of `proof_submitted` into `state`.
    ///
    /// Returns `false` if the token is unknown or was already decided.
    pub async fn resolve_pending(
        &self,
        token: &str,
        state: ApprovalState,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE pending_approvals
            SET state = ?1, decided_at = ?2
            WHERE token = ?3 AND state = ?4
            ",
        )
        .bind(state.as_str())
        .bind(decided_at)
        .bind(token)
        .bind(ApprovalState::ProofSubmitted.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Puts an approved proof back into `proof_submitted` after a failed grant.
    pub async fn reopen_pending(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE pending_approvals
            SET state = ?1, decided_at = NULL
            WHERE token = ?2 AND state = ?3
            ",
        )
        .bind(ApprovalState::ProofSubmitted.as_str())
        .bind(token)
        .bind(ApprovalState::Approved.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Drops approvals decided before `before`. Undecided proofs are kept.
    pub async fn prune_decided(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM pending_approvals
            WHERE state != ?1 AND decided_at IS NOT NULL AND decided_at < ?2
            ",
        )
        .bind(ApprovalState::ProofSubmitted.as_str())
        .bind(before)
        .execute(&self.pool)
        .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!("Pruned {} decided approvals", pruned);
        }
        Ok(pruned)
    }

    /// Removes a pending approval.
    pub async fn delete_pending(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_approvals WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists proofs still waiting for a decision, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<PendingApproval>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT token, subscriber_id, display_name, username, photo_file_id, state, submitted_at, decided_at
            FROM pending_approvals
            WHERE state = ?1
            ORDER BY submitted_at
            ",
        )
        .bind(ApprovalState::ProofSubmitted.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pending_from_row).collect()
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingApproval, StoreError> {
    let state: String = row.try_get("state")?;
    let state = state.parse().map_err(|reason| StoreError::CorruptRow {
        table: "pending_approvals",
        reason,
    })?;

    Ok(PendingApproval {
        token: row.try_get("token")?,
        subscriber_id: row.try_get("subscriber_id")?,
        display_name: row.try_get("display_name")?,
        username: row.try_get("username")?,
        photo_file_id: row.try_get("photo_file_id")?,
        state,
        submitted_at: row.try_get("submitted_at")?,
        decided_at: row.try_get("decided_at")?,
    })
}
