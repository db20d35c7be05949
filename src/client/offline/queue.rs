//! # Mutation Queue
//!
//! The persistent queue store. Every UI mutation lands here first, whether or
//! not the device is online, and stays until the server confirms it and a
//! drain pass sweeps it, or until someone explicitly discards it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use floorsync::client::local_db::LocalDatabase;
//! use floorsync::client::offline::{MutationQueue, RetryPolicy};
//! # use floorsync::shared::MutationPayload;
//!
//! # async fn example(payload: MutationPayload) -> Result<(), floorsync::client::offline::QueueError> {
//! let queue = MutationQueue::new(LocalDatabase::in_memory().await?, RetryPolicy::default());
//!
//! let id = queue.enqueue(payload).await?;
//! for mutation in queue.list_pending().await? {
//!     // dispatch...
//!     queue.mark_synced(mutation.id).await?;
//! }
//! queue.sweep_synced().await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::retry::{FailureDisposition, RetryPolicy};
use crate::client::dispatch::DispatchError;
use crate::client::local_db::{DatabaseStats, LocalDatabase};
use crate::shared::{MutationId, MutationPayload, QueuedMutation};

/// Queue store failure; only local storage can fail
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("local storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Persistent queue of not-yet-confirmed mutations
///
/// Clones share the same underlying store.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    db: LocalDatabase,
    policy: RetryPolicy,
}

impl MutationQueue {
    pub fn new(db: LocalDatabase, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn database(&self) -> &LocalDatabase {
        &self.db
    }

    /// Append a mutation; written through before this returns
    pub async fn enqueue(&self, payload: MutationPayload) -> Result<MutationId, QueueError> {
        let mutation = QueuedMutation {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
            synced: false,
            quarantined: false,
            attempts: 0,
            rejections: 0,
            last_attempt_at: None,
            last_error: None,
        };

        self.db.insert_mutation(&mutation).await?;
        tracing::debug!(mutation_id = %mutation.id, kind = %mutation.kind(), "mutation enqueued");
        Ok(mutation.id)
    }

    /// Mark a mutation as confirmed by the server
    ///
    /// Unknown, already-synced and already-swept ids are no-ops.
    pub async fn mark_synced(&self, id: MutationId) -> Result<(), QueueError> {
        if !self.db.set_mutation_synced(id).await? {
            tracing::trace!(mutation_id = %id, "mark_synced on unknown or synced id");
        }
        Ok(())
    }

    /// Remove every confirmed mutation
    pub async fn sweep_synced(&self) -> Result<u64, QueueError> {
        let removed = self.db.delete_synced_mutations().await?;
        if removed > 0 {
            tracing::debug!(removed, "swept synced mutations");
        }
        Ok(removed)
    }

    /// Snapshot of the pending mutations in insertion order
    pub async fn list_pending(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        Ok(self.db.pending_mutations().await?)
    }

    /// Record a failed dispatch attempt and apply the quarantine policy
    pub async fn record_failure(
        &self,
        id: MutationId,
        error: &DispatchError,
    ) -> Result<FailureDisposition, QueueError> {
        let rejected = self.policy.counts_as_rejection(error);
        let record = self
            .db
            .record_mutation_failure(id, &error.to_string(), rejected, self.policy.max_rejections)
            .await?;

        let disposition = match record {
            Some(record) if record.quarantined => {
                tracing::warn!(
                    mutation_id = %id,
                    rejections = record.rejections,
                    "mutation quarantined after repeated rejections"
                );
                FailureDisposition::Quarantined
            }
            Some(_) => FailureDisposition::Retry,
            None => FailureDisposition::Unknown,
        };
        Ok(disposition)
    }

    pub async fn get(&self, id: MutationId) -> Result<Option<QueuedMutation>, QueueError> {
        Ok(self.db.get_mutation(id).await?)
    }

    pub async fn list_quarantined(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        Ok(self.db.quarantined_mutations().await?)
    }

    /// Put a quarantined mutation back in line with a clean rejection count
    pub async fn requeue(&self, id: MutationId) -> Result<bool, QueueError> {
        let released = self.db.release_quarantined_mutation(id).await?;
        if released {
            tracing::info!(mutation_id = %id, "quarantined mutation requeued");
        }
        Ok(released)
    }

    /// Operator-initiated removal; the only way an unsynced item leaves
    pub async fn discard(&self, id: MutationId) -> Result<bool, QueueError> {
        let removed = self.db.delete_mutation(id).await?;
        if removed {
            tracing::info!(mutation_id = %id, "mutation discarded");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.db.get_stats().await?.into())
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting for the next pass
    pub pending: usize,
    /// Confirmed but not yet swept
    pub synced_unswept: usize,
    /// Held back after repeated rejections
    pub quarantined: usize,
}

impl From<DatabaseStats> for QueueStats {
    fn from(stats: DatabaseStats) -> Self {
        Self {
            pending: stats.pending_mutations,
            synced_unswept: stats.synced_unswept,
            quarantined: stats.quarantined_mutations,
        }
    }
}
