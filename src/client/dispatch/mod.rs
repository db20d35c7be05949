//! # Remote Dispatch
//!
//! Maps a queued mutation to the remote call that applies it. Handlers are
//! stateless; the engine supplies the bearer token for each call.
//!
//! Every call carries the mutation id as an idempotency key. The remote
//! endpoints are required to treat a repeated key as the same request, which
//! is what makes at-least-once redelivery safe after a lost response.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::QueuedMutation;

pub use http::HttpDispatcher;

/// Successful application of a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    /// Identifier of the resource the server created, when it reports one
    pub server_id: Option<String>,
}

/// Typed dispatch failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Transport failure, timeout or server-side error; retry later
    #[error("network error: {0}")]
    Network(String),
    /// The server rejected the payload as semantically invalid
    #[error("rejected by server: {0}")]
    Validation(String),
    /// The server no longer accepts the session
    #[error("session rejected: {0}")]
    Authorization(String),
    /// The mutation conflicts with current server state
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DispatchError {
    /// Failures that count toward quarantine
    pub fn is_rejection(&self) -> bool {
        matches!(self, DispatchError::Validation(_) | DispatchError::Conflict(_))
    }

    /// Failures that mean the held session is dead
    pub fn invalidates_session(&self) -> bool {
        matches!(self, DispatchError::Authorization(_))
    }
}

/// Applies queued mutations to the remote system
#[async_trait]
pub trait RemoteDispatch: Send + Sync + 'static {
    async fn dispatch(
        &self,
        mutation: &QueuedMutation,
        access_token: &str,
    ) -> Result<DispatchReceipt, DispatchError>;
}
