//! # Sync Engine
//!
//! Drains the mutation queue. A pass checks connectivity, obtains a session,
//! then dispatches every pending item in insertion order. One item failing
//! never stops the others, except when the server rejects the session: the
//! pass ends there and the remaining items wait for a new login.
//!
//! Only one pass runs at a time. A trigger that arrives while a pass is
//! running is reported as [`PassOutcome::AlreadyRunning`] and does nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use super::metrics::SyncMetrics;
use super::network_monitor::ConnectivityMonitor;
use super::sync_state::SyncState;
use crate::client::dispatch::{DispatchError, RemoteDispatch};
use crate::client::offline::{FailureDisposition, MutationQueue, QueueError};
use crate::client::session::{SessionCoordinator, SessionError};
use crate::shared::{AppConfig, MutationId, MutationPayload, QueuedMutation, SharedError};

/// What started a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Reconnect,
    Manual,
}

/// Result of a completed pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub trigger: Trigger,
    pub synced: usize,
    pub failed: usize,
    /// Failed items that crossed the rejection threshold in this pass
    pub quarantined: usize,
    /// The server rejected the session and the pass stopped early
    pub session_rejected: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub fn new(trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            trigger,
            synced: 0,
            failed: 0,
            quarantined: 0,
            session_rejected: false,
            started_at: now,
            finished_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    Offline,
    Session(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    AlreadyRunning,
    Deferred(DeferReason),
    Idle,
    Completed(PassReport),
}

/// Where a submitted mutation ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Dispatched and confirmed right away
    Synced,
    /// Waiting for the next pass
    Queued,
    /// Rejected often enough to be held back
    Quarantined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: MutationId,
    pub status: SubmitStatus,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("invalid mutation: {0}")]
    Invalid(#[from] SharedError),
    #[error("sync service is already running")]
    AlreadyStarted,
}

enum ItemOutcome {
    Synced,
    Failed(FailureDisposition),
    SessionRejected,
}

/// Clears the reentrancy flag on every exit path
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    queue: MutationQueue,
    session: SessionCoordinator,
    dispatcher: Arc<dyn RemoteDispatch>,
    monitor: ConnectivityMonitor,
    dispatch_timeout: Duration,
    pass_in_progress: AtomicBool,
    reports: broadcast::Sender<PassReport>,
    state: RwLock<SyncState>,
    metrics: RwLock<SyncMetrics>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("queue", &self.queue)
            .field("session", &self.session)
            .field("monitor", &self.monitor)
            .field("dispatch_timeout", &self.dispatch_timeout)
            .field("pass_in_progress", &self.is_pass_running())
            .finish()
    }
}

impl SyncEngine {
    pub fn new(
        queue: MutationQueue,
        session: SessionCoordinator,
        dispatcher: Arc<dyn RemoteDispatch>,
        monitor: ConnectivityMonitor,
        config: &AppConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(32);
        Self {
            queue,
            session,
            dispatcher,
            monitor,
            dispatch_timeout: config.dispatch_timeout,
            pass_in_progress: AtomicBool::new(false),
            reports,
            state: RwLock::new(SyncState::default()),
            metrics: RwLock::new(SyncMetrics::new()),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn is_pass_running(&self) -> bool {
        self.pass_in_progress.load(Ordering::Acquire)
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<PassReport> {
        self.reports.subscribe()
    }

    /// Load the persisted last-sync time and current queue counts
    pub async fn restore_state(&self) -> Result<(), SyncError> {
        let last_sync = self
            .queue
            .database()
            .get_last_sync_time()
            .await
            .map_err(QueueError::from)?;
        self.state.write().await.last_sync = last_sync;
        self.refresh_counts().await
    }

    pub async fn status(&self) -> SyncState {
        let mut state = self.state.read().await.clone();
        state.is_syncing = self.is_pass_running();
        state.is_online = self.monitor.is_online();
        state
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.metrics.read().await.clone()
    }

    /// Run one drain pass
    pub async fn run_pass(&self, trigger: Trigger) -> Result<PassOutcome, SyncError> {
        let Some(_guard) = PassGuard::acquire(&self.pass_in_progress) else {
            tracing::debug!(?trigger, "pass already running; trigger ignored");
            self.metrics.write().await.record_skipped();
            return Ok(PassOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        let result = self.drain(trigger).await;
        self.finish_pass(&result, started.elapsed()).await;
        result
    }

    async fn drain(&self, trigger: Trigger) -> Result<PassOutcome, SyncError> {
        if !self.monitor.is_online() {
            tracing::debug!(?trigger, "offline; pass deferred");
            return Ok(PassOutcome::Deferred(DeferReason::Offline));
        }

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            return Ok(PassOutcome::Idle);
        }

        let token = match self.session.ensure_valid_session().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, pending = pending.len(), "no session; pass deferred");
                return Ok(PassOutcome::Deferred(DeferReason::Session(e)));
            }
        };

        tracing::info!(?trigger, pending = pending.len(), "sync pass started");
        let mut report = PassReport::new(trigger);

        for mutation in &pending {
            match self.dispatch_one(mutation, &token).await? {
                ItemOutcome::Synced => report.synced += 1,
                ItemOutcome::Failed(disposition) => {
                    report.failed += 1;
                    if disposition == FailureDisposition::Quarantined {
                        report.quarantined += 1;
                    }
                }
                ItemOutcome::SessionRejected => {
                    report.failed += 1;
                    report.session_rejected = true;
                    self.session.invalidate().await;
                    break;
                }
            }
        }

        self.queue.sweep_synced().await?;
        report.finished_at = Utc::now();

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            quarantined = report.quarantined,
            session_rejected = report.session_rejected,
            "sync pass finished"
        );
        Ok(PassOutcome::Completed(report))
    }

    async fn dispatch_one(
        &self,
        mutation: &QueuedMutation,
        token: &str,
    ) -> Result<ItemOutcome, SyncError> {
        let result = match tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.dispatch(mutation, token),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Network(format!(
                "dispatch timed out after {:?}",
                self.dispatch_timeout
            ))),
        };

        match result {
            Ok(receipt) => {
                self.queue.mark_synced(mutation.id).await?;
                tracing::debug!(
                    mutation_id = %mutation.id,
                    kind = %mutation.kind(),
                    server_id = ?receipt.server_id,
                    "mutation synced"
                );
                Ok(ItemOutcome::Synced)
            }
            Err(err) => {
                let disposition = self.queue.record_failure(mutation.id, &err).await?;
                if err.is_rejection() {
                    tracing::warn!(mutation_id = %mutation.id, kind = %mutation.kind(), error = %err, "mutation rejected");
                } else {
                    tracing::debug!(mutation_id = %mutation.id, error = %err, "dispatch failed");
                }

                if err.invalidates_session() {
                    Ok(ItemOutcome::SessionRejected)
                } else {
                    Ok(ItemOutcome::Failed(disposition))
                }
            }
        }
    }

    /// Enqueue a mutation and, when possible, dispatch it right away
    ///
    /// The mutation is durable once it is enqueued, before any network
    /// work. The immediate attempt runs under the pass guard and only with a
    /// session token already held; it never waits on a refresh. If a pass is
    /// running or no usable token is held, the item waits for the next
    /// trigger.
    pub async fn submit(&self, payload: MutationPayload) -> Result<SubmitOutcome, SyncError> {
        payload.validate()?;
        let id = self.queue.enqueue(payload).await?;
        let queued = SubmitOutcome {
            id,
            status: SubmitStatus::Queued,
        };

        if !self.monitor.is_online() {
            self.refresh_counts().await?;
            return Ok(queued);
        }
        let Some(_guard) = PassGuard::acquire(&self.pass_in_progress) else {
            tracing::debug!(mutation_id = %id, "pass running; submitted mutation left queued");
            return Ok(queued);
        };

        let status = self.dispatch_submitted(id).await?;
        self.refresh_counts().await?;
        Ok(SubmitOutcome { id, status })
    }

    async fn dispatch_submitted(&self, id: MutationId) -> Result<SubmitStatus, SyncError> {
        let Some(mutation) = self.queue.get(id).await? else {
            return Ok(SubmitStatus::Queued);
        };
        let Some(token) = self.session.usable_token().await else {
            tracing::debug!(mutation_id = %id, "no usable session; submitted mutation left queued");
            return Ok(SubmitStatus::Queued);
        };

        let status = match self.dispatch_one(&mutation, &token).await? {
            ItemOutcome::Synced => {
                self.queue.sweep_synced().await?;
                SubmitStatus::Synced
            }
            ItemOutcome::Failed(FailureDisposition::Quarantined) => SubmitStatus::Quarantined,
            ItemOutcome::Failed(_) => SubmitStatus::Queued,
            ItemOutcome::SessionRejected => {
                self.session.invalidate().await;
                SubmitStatus::Queued
            }
        };
        Ok(status)
    }

    async fn finish_pass(&self, result: &Result<PassOutcome, SyncError>, elapsed: Duration) {
        match result {
            Ok(PassOutcome::Completed(report)) => {
                self.metrics.write().await.record_completed(report, elapsed);
                {
                    let mut state = self.state.write().await;
                    state.last_sync = Some(report.finished_at);
                    state.last_report = Some(report.clone());
                    if report.session_rejected {
                        state.push_error("session rejected by server; login required");
                    }
                }
                if let Err(e) = self
                    .queue
                    .database()
                    .set_last_sync_time(report.finished_at)
                    .await
                {
                    tracing::error!(error = %e, "failed to persist last sync time");
                }
                // No subscribers is fine
                let _ = self.reports.send(report.clone());
            }
            Ok(PassOutcome::Deferred(reason)) => {
                self.metrics.write().await.record_deferred();
                if let DeferReason::Session(e) = reason {
                    self.state.write().await.push_error(e.to_string());
                }
            }
            Ok(PassOutcome::Idle) => self.metrics.write().await.record_idle(),
            Ok(PassOutcome::AlreadyRunning) => {}
            Err(e) => {
                tracing::error!(error = %e, "sync pass failed");
                self.metrics.write().await.record_failure();
                self.state.write().await.push_error(e.to_string());
            }
        }

        if let Err(e) = self.refresh_counts().await {
            tracing::error!(error = %e, "failed to read queue stats");
        }
    }

    async fn refresh_counts(&self) -> Result<(), SyncError> {
        let stats = self.queue.stats().await?;
        let mut state = self.state.write().await;
        state.pending_mutations = stats.pending;
        state.quarantined_mutations = stats.quarantined;
        Ok(())
    }
}
