//! Session test helpers
//!
//! A scripted refresher that records when it was called, for checking
//! single-flight and spacing behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use floorsync::client::{RefreshedToken, SessionError, SessionRefresher};
use tokio::time::Instant;

/// Build a token with a 15 minute lifetime
pub fn test_token(value: &str) -> RefreshedToken {
    RefreshedToken {
        access_token: value.to_string(),
        expires_in: Some(Duration::from_secs(900)),
    }
}

pub struct FakeRefresher {
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    script: Mutex<VecDeque<Result<RefreshedToken, SessionError>>>,
    fallback: Result<RefreshedToken, SessionError>,
    delay: Duration,
}

impl FakeRefresher {
    /// Always succeeds with `token`
    pub fn succeeding(token: &str) -> Self {
        Self::scripted(Vec::new(), Ok(test_token(token)))
    }

    /// Always fails with `error`
    pub fn failing(error: SessionError) -> Self {
        Self::scripted(Vec::new(), Err(error))
    }

    /// Plays `script` in order, then repeats `fallback`
    pub fn scripted(
        script: Vec<Result<RefreshedToken, SessionError>>,
        fallback: Result<RefreshedToken, SessionError>,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionRefresher for FakeRefresher {
    async fn refresh(&self) -> Result<RefreshedToken, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
