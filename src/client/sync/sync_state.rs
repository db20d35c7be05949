//! # Sync State
//!
//! Snapshot of the sync engine for status displays.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::engine::PassReport;

/// Recent errors kept in the snapshot
pub const MAX_RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncState {
    pub is_syncing: bool,
    pub is_online: bool,
    /// Finish time of the last completed pass
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_mutations: usize,
    pub quarantined_mutations: usize,
    pub last_report: Option<PassReport>,
    /// Most recent first
    pub errors: Vec<String>,
}

impl SyncState {
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.insert(0, error.into());
        self.errors.truncate(MAX_RECENT_ERRORS);
    }
}
