//! # Background Sync Service
//!
//! Keeps the mutation queue draining without the UI having to ask. The
//! service owns a [`SyncEngine`] and a background task that runs a pass on
//! every timer tick and on every offline→online transition. Explicit
//! `force_sync` calls and `submit` share the same engine and reentrancy
//! guard, so triggers never overlap.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use floorsync::client::sync::{SyncEngine, SyncService};
//! # use floorsync::shared::AppConfig;
//!
//! # async fn example(engine: Arc<SyncEngine>, config: AppConfig) -> Result<(), floorsync::client::sync::SyncError> {
//! let mut sync_service = SyncService::new(engine, &config);
//! sync_service.start()?;
//!
//! let mut reports = sync_service.subscribe_reports();
//! sync_service.force_sync().await?;
//! let report = reports.recv().await;
//! println!("Sync report: {:?}", report);
//!
//! let status = sync_service.status().await;
//! println!("{} pending", status.pending_mutations);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod metrics;
pub mod network_monitor;
pub mod sync_state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::shared::{AppConfig, MutationPayload};

pub use engine::{
    DeferReason, PassOutcome, PassReport, SubmitOutcome, SubmitStatus, SyncEngine, SyncError,
    Trigger,
};
pub use metrics::SyncMetrics;
pub use network_monitor::{spawn_reachability_probe, ConnectivityMonitor, NetworkStatus};
pub use sync_state::SyncState;

/// Main sync service coordinator
#[derive(Debug)]
pub struct SyncService {
    engine: Arc<SyncEngine>,
    sync_interval: Duration,
    background_task: Option<JoinHandle<()>>,
}

impl SyncService {
    pub fn new(engine: Arc<SyncEngine>, config: &AppConfig) -> Self {
        Self {
            engine,
            sync_interval: config.sync_interval,
            background_task: None,
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.background_task.is_some()
    }

    /// Start the background sync task
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.background_task.is_some() {
            return Err(SyncError::AlreadyStarted);
        }

        let engine = Arc::clone(&self.engine);
        let sync_interval = self.sync_interval;
        let handle = tokio::spawn(async move {
            Self::background_sync_loop(engine, sync_interval).await;
        });

        self.background_task = Some(handle);
        tracing::info!(interval = ?self.sync_interval, "sync service started");
        Ok(())
    }

    /// Stop the background sync task
    ///
    /// A pass that is mid-flight is cancelled; its guard is released and any
    /// undispatched item stays queued.
    pub fn stop(&mut self) {
        if let Some(handle) = self.background_task.take() {
            handle.abort();
            tracing::info!("sync service stopped");
        }
    }

    /// Run a pass now
    pub async fn force_sync(&self) -> Result<PassOutcome, SyncError> {
        self.engine.run_pass(Trigger::Manual).await
    }

    pub async fn submit(&self, payload: MutationPayload) -> Result<SubmitOutcome, SyncError> {
        self.engine.submit(payload).await
    }

    pub async fn status(&self) -> SyncState {
        self.engine.status().await
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.engine.metrics().await
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<PassReport> {
        self.engine.subscribe_reports()
    }

    async fn background_sync_loop(engine: Arc<SyncEngine>, sync_interval: Duration) {
        let mut interval = tokio::time::interval(sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut transitions = engine.monitor().subscribe();

        loop {
            let trigger = tokio::select! {
                _ = interval.tick() => Trigger::Timer,
                transition = transitions.recv() => match transition {
                    Ok(NetworkStatus::Online) => Trigger::Reconnect,
                    Ok(NetworkStatus::Offline) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "missed connectivity transitions");
                        if engine.monitor().is_online() {
                            Trigger::Reconnect
                        } else {
                            continue;
                        }
                    }
                    Err(RecvError::Closed) => return,
                },
            };

            if let Err(e) = engine.run_pass(trigger).await {
                tracing::error!(error = %e, ?trigger, "sync cycle failed");
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.stop();
    }
}
