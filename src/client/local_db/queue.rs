//! # Mutation Queue Rows
//!
//! Row-level operations on the `mutation_queue` table. Ordering comes from the
//! autoincrement `seq` column, never from timestamps, so two mutations
//! enqueued within the same clock tick still keep their insertion order.
//!
//! Policy (when to quarantine, what counts as a rejection) lives in
//! `offline::queue`; this module only stores what it is told.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{LocalDatabase, Result};
use crate::shared::{MutationId, MutationKind, MutationPayload, QueuedMutation, SharedError};

const SELECT_COLUMNS: &str = "id, kind, payload, enqueued_at, synced, quarantined, attempts, \
                              rejections, last_attempt_at, last_error";

/// Counters after a failed attempt has been recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempts: u32,
    pub rejections: u32,
    pub quarantined: bool,
}

impl LocalDatabase {
    /// Append a mutation to the end of the queue
    pub async fn insert_mutation(&self, mutation: &QueuedMutation) -> Result<()> {
        let body = mutation
            .payload
            .body()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "INSERT INTO mutation_queue
                (id, kind, payload, enqueued_at, synced, quarantined, attempts, rejections)
             VALUES (?, ?, ?, ?, 0, 0, 0, 0)",
        )
        .bind(mutation.id.to_string())
        .bind(mutation.kind().as_str())
        .bind(body.to_string())
        .bind(mutation.enqueued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flag a mutation as confirmed; returns whether a row changed
    pub async fn set_mutation_synced(&self, id: MutationId) -> Result<bool> {
        let result = sqlx::query("UPDATE mutation_queue SET synced = 1 WHERE id = ? AND synced = 0")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every confirmed mutation
    pub async fn delete_synced_mutations(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mutation_queue WHERE synced = 1")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Unsynced, non-quarantined mutations in insertion order
    pub async fn pending_mutations(&self) -> Result<Vec<QueuedMutation>> {
        self.select_mutations("WHERE synced = 0 AND quarantined = 0").await
    }

    /// Quarantined mutations in insertion order
    pub async fn quarantined_mutations(&self) -> Result<Vec<QueuedMutation>> {
        self.select_mutations("WHERE synced = 0 AND quarantined = 1").await
    }

    /// Look up a single mutation regardless of its state
    pub async fn get_mutation(&self, id: MutationId) -> Result<Option<QueuedMutation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mutation_queue WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_mutation).transpose()
    }

    /// Record a failed dispatch attempt
    ///
    /// `rejected` attempts also bump the rejection counter; once it reaches
    /// `max_rejections` the row is quarantined in the same statement.
    /// Returns `None` when the id is unknown or already synced.
    pub async fn record_mutation_failure(
        &self,
        id: MutationId,
        error: &str,
        rejected: bool,
        max_rejections: u32,
    ) -> Result<Option<AttemptRecord>> {
        let row = sqlx::query(
            "UPDATE mutation_queue SET
                attempts = attempts + 1,
                rejections = rejections + ?1,
                quarantined = CASE
                    WHEN ?1 > 0 AND rejections + ?1 >= ?2 THEN 1
                    ELSE quarantined
                END,
                last_attempt_at = ?3,
                last_error = ?4
             WHERE id = ?5 AND synced = 0
             RETURNING attempts, rejections, quarantined",
        )
        .bind(u32::from(rejected))
        .bind(max_rejections)
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<AttemptRecord> {
            Ok(AttemptRecord {
                attempts: row.try_get("attempts")?,
                rejections: row.try_get("rejections")?,
                quarantined: row.try_get("quarantined")?,
            })
        })
        .transpose()
    }

    /// Release a quarantined mutation back into the drain set
    pub async fn release_quarantined_mutation(&self, id: MutationId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE mutation_queue SET quarantined = 0, rejections = 0
             WHERE id = ? AND quarantined = 1",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Permanently remove a mutation
    pub async fn delete_mutation(&self, id: MutationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn select_mutations(&self, filter: &str) -> Result<Vec<QueuedMutation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mutation_queue {} ORDER BY seq ASC",
            SELECT_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut mutations = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_mutation(row) {
                Ok(mutation) => mutations.push(mutation),
                Err(e) => {
                    // Left in place for inspection; never silently deleted.
                    let id: Option<String> = row.try_get("id").ok();
                    tracing::warn!(?id, error = %e, "skipping unreadable queue row");
                }
            }
        }
        Ok(mutations)
    }
}

fn row_to_mutation(row: &SqliteRow) -> Result<QueuedMutation> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let enqueued_at: String = row.try_get("enqueued_at")?;
    let last_attempt_at: Option<String> = row.try_get("last_attempt_at")?;

    let id = MutationId::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let kind: MutationKind = kind.parse().map_err(decode_error)?;
    let body: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| decode_error(SharedError::from(e)))?;
    let payload = MutationPayload::from_parts(kind, body).map_err(decode_error)?;

    Ok(QueuedMutation {
        id,
        payload,
        enqueued_at: parse_timestamp(&enqueued_at)?,
        synced: row.try_get("synced")?,
        quarantined: row.try_get("quarantined")?,
        attempts: row.try_get("attempts")?,
        rejections: row.try_get("rejections")?,
        last_attempt_at: last_attempt_at.as_deref().map(parse_timestamp).transpose()?,
        last_error: row.try_get("last_error")?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_error(err: SharedError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}
