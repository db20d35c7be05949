//! # Network Monitor
//!
//! Connectivity signal for sync scheduling. The level is fed from outside,
//! either by the platform or by the reachability probe below, and consumers
//! react to transitions.
//!
//! The signal is advisory. A failed remote call is authoritative, so the sync
//! engine still treats dispatch failures as failures when the monitor says
//! online.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::client::config::Config;

/// Upper bound for a single health check
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn from_online(online: bool) -> Self {
        if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

type TransitionCallback = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

struct MonitorInner {
    online: AtomicBool,
    callbacks: Mutex<Vec<TransitionCallback>>,
    transitions: broadcast::Sender<NetworkStatus>,
}

/// Shared connectivity state; clones observe the same level
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(initially_online),
                callbacks: Mutex::new(Vec::new()),
                transitions,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> NetworkStatus {
        NetworkStatus::from_online(self.is_online())
    }

    /// Feed a new connectivity level; returns whether it was a transition
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        let status = NetworkStatus::from_online(online);
        tracing::info!(?status, "connectivity changed");

        let callbacks = self
            .inner
            .callbacks
            .lock()
            .map(|callbacks| callbacks.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        for callback in callbacks {
            callback(status);
        }
        // No receivers is fine
        let _ = self.inner.transitions.send(status);
        true
    }

    /// Register a callback for future transitions; it does not fire for the
    /// current level
    pub fn on_transition<F>(&self, callback: F)
    where
        F: Fn(NetworkStatus) + Send + Sync + 'static,
    {
        let callback: TransitionCallback = Arc::new(callback);
        match self.inner.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(callback),
            Err(poisoned) => poisoned.into_inner().push(callback),
        }
    }

    /// Async stream of transitions
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatus> {
        self.inner.transitions.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Periodically check the health endpoint and feed the monitor
pub fn spawn_reachability_probe(
    monitor: ConnectivityMonitor,
    client: Client,
    config: Config,
) -> JoinHandle<()> {
    let url = config.api_url("/api/health");
    let period = config.app().probe_interval;
    let timeout = period.min(PROBE_TIMEOUT);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let reachable = match client.get(&url).timeout(timeout).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    tracing::debug!(error = %e, "health check failed");
                    false
                }
            };
            monitor.set_online(reachable);
        }
    })
}
