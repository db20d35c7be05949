//! # Session Coordinator
//!
//! Holds the short-lived access token and keeps it fresh. The long-lived
//! refresh credential is a cookie managed by the server and the HTTP client;
//! this module only ever sees what a refresh returns.
//!
//! At most one refresh runs at a time. Concurrent callers of
//! [`SessionCoordinator::ensure_valid_session`] all await the same shared
//! operation and observe the same outcome. Consecutive refresh attempts are
//! spaced by at least `refresh_min_interval`.
//!
//! ## State machine
//!
//! ```text
//! Unauthenticated --refresh--> Authenticating --ok--> Authenticated
//!                                   |
//!                                   +--terminal--> Unauthenticated
//!                                   +--transient--> (state before the attempt)
//! ```

pub mod http;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::local_db::{LocalDatabase, StoredSession};
use crate::shared::AppConfig;

pub use http::SessionClient;

/// Tokens this close to expiry are refreshed before use
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Failure to obtain a valid session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The credential was rejected; the user has to log in again
    #[error("session rejected: {0}")]
    Terminal(String),
    /// The refresh could not be completed right now; a later call may retry
    #[error("session refresh failed: {0}")]
    Transient(String),
}

impl SessionError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::Terminal(_))
    }
}

/// Token returned by a successful login or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
}

/// Exchanges the long-lived credential for a new access token
#[async_trait]
pub trait SessionRefresher: Send + Sync + 'static {
    async fn refresh(&self) -> Result<RefreshedToken, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, SessionError>>>;

struct SessionInner {
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    state: SessionState,
    refresh_in_flight: Option<RefreshFuture>,
    last_refresh_attempt_at: Option<Instant>,
}

impl SessionInner {
    fn usable_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.access_token.as_deref()?;
        match self.expires_at {
            Some(expires_at) => {
                let skew = chrono::Duration::seconds(TOKEN_EXPIRY_SKEW.as_secs() as i64);
                (expires_at - skew > now).then_some(token)
            }
            None => Some(token),
        }
    }

    fn clear(&mut self) {
        self.access_token = None;
        self.expires_at = None;
        self.state = SessionState::Unauthenticated;
    }

    fn stored(&self) -> Option<StoredSession> {
        self.access_token.as_ref().map(|token| StoredSession {
            access_token: token.clone(),
            expires_at: self.expires_at,
        })
    }
}

/// Shared handle to the session; clones refer to the same credential
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Mutex<SessionInner>>,
    refresher: Arc<dyn SessionRefresher>,
    db: Option<LocalDatabase>,
    min_interval: Duration,
    refresh_timeout: Duration,
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("min_interval", &self.min_interval)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("persistent", &self.db.is_some())
            .finish()
    }
}

impl SessionCoordinator {
    pub fn new(refresher: Arc<dyn SessionRefresher>, config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                access_token: None,
                expires_at: None,
                state: SessionState::Unauthenticated,
                refresh_in_flight: None,
                last_refresh_attempt_at: None,
            })),
            refresher,
            db: None,
            min_interval: config.refresh_min_interval,
            refresh_timeout: config.refresh_timeout,
        }
    }

    /// Persist the access token to the local metadata table
    pub fn with_persistence(mut self, db: LocalDatabase) -> Self {
        self.db = Some(db);
        self
    }

    /// Load a previously persisted token; returns whether one was found
    pub async fn restore(&self) -> Result<bool, sqlx::Error> {
        let Some(db) = &self.db else {
            return Ok(false);
        };
        let Some(stored) = db.load_session().await? else {
            return Ok(false);
        };

        let mut inner = self.inner.lock().await;
        inner.access_token = Some(stored.access_token);
        inner.expires_at = stored.expires_at;
        inner.state = SessionState::Authenticated;
        tracing::info!(expires_at = ?stored.expires_at, "restored persisted session");
        Ok(true)
    }

    /// Return a usable access token, refreshing it first if needed
    pub async fn ensure_valid_session(&self) -> Result<String, SessionError> {
        let refresh = {
            let mut inner = self.inner.lock().await;
            if let Some(in_flight) = &inner.refresh_in_flight {
                in_flight.clone()
            } else if let Some(token) = inner.usable_token(Utc::now()) {
                return Ok(token.to_string());
            } else {
                self.start_refresh(&mut inner)
            }
        };
        refresh.await
    }

    /// Must be called with the lock held so no second refresh can start
    fn start_refresh(&self, inner: &mut SessionInner) -> RefreshFuture {
        let previous_state = inner.state;
        let not_before = inner
            .last_refresh_attempt_at
            .map(|at| at + self.min_interval);
        inner.state = SessionState::Authenticating;

        let this = self.clone();
        let refresh = async move {
            if let Some(not_before) = not_before {
                if not_before > Instant::now() {
                    tracing::debug!("waiting for refresh spacing");
                    tokio::time::sleep_until(not_before).await;
                }
            }
            this.inner.lock().await.last_refresh_attempt_at = Some(Instant::now());

            let result =
                match tokio::time::timeout(this.refresh_timeout, this.refresher.refresh()).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::Transient(format!(
                        "refresh timed out after {:?}",
                        this.refresh_timeout
                    ))),
                };
            this.complete_refresh(result, previous_state).await
        }
        .boxed()
        .shared();

        inner.refresh_in_flight = Some(refresh.clone());
        // Drive the refresh to completion even if every caller goes away.
        tokio::spawn(refresh.clone());
        refresh
    }

    async fn complete_refresh(
        &self,
        result: Result<RefreshedToken, SessionError>,
        previous_state: SessionState,
    ) -> Result<String, SessionError> {
        let mut inner = self.inner.lock().await;
        inner.refresh_in_flight = None;

        match result {
            Ok(token) => {
                apply_token(&mut inner, &token);
                let stored = inner.stored();
                drop(inner);

                tracing::info!(expires_in = ?token.expires_in, "session refreshed");
                self.persist(stored).await;
                Ok(token.access_token)
            }
            Err(err @ SessionError::Terminal(_)) => {
                inner.clear();
                drop(inner);

                tracing::warn!(error = %err, "session refresh rejected; login required");
                self.persist(None).await;
                Err(err)
            }
            Err(err @ SessionError::Transient(_)) => {
                inner.state = previous_state;
                tracing::warn!(error = %err, "session refresh failed; will retry later");
                Err(err)
            }
        }
    }

    /// Install a token obtained out of band, typically from an explicit login
    pub async fn install_token(&self, token: RefreshedToken) {
        let stored = {
            let mut inner = self.inner.lock().await;
            apply_token(&mut inner, &token);
            inner.stored()
        };
        tracing::info!("session established");
        self.persist(stored).await;
    }

    /// Drop the session after the server reported it invalid
    pub async fn invalidate(&self) {
        self.inner.lock().await.clear();
        tracing::warn!("session invalidated");
        self.persist(None).await;
    }

    /// The held token if it is not close to expiry; never starts a refresh
    pub async fn usable_token(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .usable_token(Utc::now())
            .map(str::to_string)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.access_token.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    async fn persist(&self, session: Option<StoredSession>) {
        let Some(db) = &self.db else {
            return;
        };
        let result = match &session {
            Some(session) => db.save_session(session).await,
            None => db.clear_session().await,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to persist session");
        }
    }
}

fn apply_token(inner: &mut SessionInner, token: &RefreshedToken) {
    inner.access_token = Some(token.access_token.clone());
    // A lifetime past the representable range is treated as no expiry
    inner.expires_at = token.expires_in.and_then(|ttl| {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        if expires_at.is_none() {
            tracing::warn!(?ttl, "ignoring out-of-range token lifetime");
        }
        expires_at
    });
    inner.state = SessionState::Authenticated;
}
