//! # Retry and Quarantine Policy
//!
//! Failed mutations are never dropped automatically. Transient failures are
//! retried on every pass. Rejections (the server calling the payload invalid
//! or conflicting) are counted, and after `max_rejections` of them the item
//! is quarantined: it stays in the store but stops being dispatched until an
//! operator requeues or discards it.

use crate::client::dispatch::DispatchError;
use crate::shared::AppConfig;

/// Outcome of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still pending; the next pass will try again
    Retry,
    /// Held back until an operator intervenes
    Quarantined,
    /// The item was already synced or no longer exists
    Unknown,
}

/// Quarantine threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_rejections: u32,
}

impl RetryPolicy {
    pub fn new(max_rejections: u32) -> Self {
        Self {
            max_rejections: max_rejections.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.max_rejections)
    }

    /// Whether this failure moves the item toward quarantine
    pub fn counts_as_rejection(&self, error: &DispatchError) -> bool {
        error.is_rejection()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
