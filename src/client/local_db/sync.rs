//! # Sync Metadata Operations
//!
//! Key/value bookkeeping next to the mutation queue: last successful sync
//! time and the persisted access token. The long-lived refresh credential is
//! a server-managed cookie and is never written here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::{LocalDatabase, Result};

const LAST_SYNC_KEY: &str = "last_sync_time";
const SESSION_KEY: &str = "session";

/// Access token as persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LocalDatabase {
    /// Set sync metadata
    pub async fn set_sync_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_metadata (key, value, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get sync metadata
    pub async fn get_sync_metadata(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    /// Remove a metadata key
    pub async fn delete_sync_metadata(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_metadata WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get last sync timestamp
    pub async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.get_sync_metadata(LAST_SYNC_KEY).await?;
        raw.map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .transpose()
    }

    /// Set last sync timestamp
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_sync_metadata(LAST_SYNC_KEY, &at.to_rfc3339()).await
    }

    /// Persist the current access token
    pub async fn save_session(&self, session: &StoredSession) -> Result<()> {
        let value = serde_json::to_string(session).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        self.set_sync_metadata(SESSION_KEY, &value).await
    }

    /// Load the persisted access token, if any
    ///
    /// An unreadable entry is treated as absent; the user simply logs in again.
    pub async fn load_session(&self) -> Result<Option<StoredSession>> {
        let Some(raw) = self.get_sync_metadata(SESSION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted session");
                Ok(None)
            }
        }
    }

    /// Forget the persisted access token
    pub async fn clear_session(&self) -> Result<()> {
        self.delete_sync_metadata(SESSION_KEY).await
    }
}
