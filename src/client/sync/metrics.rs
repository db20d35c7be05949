//! # Sync Metrics
//!
//! Pass counters and timing for the sync engine.

use std::time::Duration;

use serde::Serialize;

use super::engine::PassReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMetrics {
    pub total_passes: u64,
    pub completed_passes: u64,
    pub deferred_passes: u64,
    pub idle_passes: u64,
    /// Triggers ignored because a pass was already running
    pub skipped_passes: u64,
    /// Passes aborted by a local storage error
    pub failed_passes: u64,
    pub items_synced: u64,
    pub items_failed: u64,
    pub items_quarantined: u64,
    pub average_pass_duration: Duration,
    pub last_pass_duration: Option<Duration>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&mut self, report: &PassReport, duration: Duration) {
        self.total_passes += 1;
        self.completed_passes += 1;
        self.items_synced += report.synced as u64;
        self.items_failed += report.failed as u64;
        self.items_quarantined += report.quarantined as u64;
        self.last_pass_duration = Some(duration);

        // Rolling average over completed passes
        let n = self.completed_passes as u32;
        let total = self.average_pass_duration * (n - 1) + duration;
        self.average_pass_duration = total / n;
    }

    pub fn record_deferred(&mut self) {
        self.total_passes += 1;
        self.deferred_passes += 1;
    }

    pub fn record_idle(&mut self) {
        self.total_passes += 1;
        self.idle_passes += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped_passes += 1;
    }

    pub fn record_failure(&mut self) {
        self.total_passes += 1;
        self.failed_passes += 1;
    }

    /// Share of dispatched items that went through
    pub fn success_rate(&self) -> f64 {
        let attempted = self.items_synced + self.items_failed;
        if attempted == 0 {
            0.0
        } else {
            self.items_synced as f64 / attempted as f64
        }
    }
}
