//! Session coordinator integration tests
//!
//! Single-flight refresh and refresh spacing, under paused time.

use std::sync::Arc;
use std::time::Duration;

use floorsync::client::{SessionCoordinator, SessionError, SessionState};
use floorsync::shared::AppConfig;
use futures_util::future::join_all;
use pretty_assertions::assert_eq;

use crate::common::{test_token, FakeRefresher};

fn config(min_interval: Duration, refresh_timeout: Duration) -> AppConfig {
    AppConfig::builder()
        .refresh_min_interval(min_interval)
        .refresh_timeout(refresh_timeout)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_refresh() {
    let refresher = FakeRefresher::succeeding("t1")
        .with_delay(Duration::from_millis(200))
        .into_arc();
    let session = SessionCoordinator::new(
        refresher.clone(),
        &config(Duration::from_secs(5), Duration::from_secs(10)),
    );

    let results = join_all((0..10).map(|_| {
        let session = session.clone();
        async move { session.ensure_valid_session().await }
    }))
    .await;

    assert_eq!(refresher.calls(), 1);
    for result in results {
        assert_eq!(result, Ok("t1".to_string()));
    }
    assert_eq!(session.state().await, SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_a_terminal_failure() {
    let refresher = FakeRefresher::failing(SessionError::Terminal("401".into()))
        .with_delay(Duration::from_millis(50))
        .into_arc();
    let session = SessionCoordinator::new(
        refresher.clone(),
        &config(Duration::from_secs(5), Duration::from_secs(10)),
    );

    let results = join_all((0..5).map(|_| {
        let session = session.clone();
        async move { session.ensure_valid_session().await }
    }))
    .await;

    assert_eq!(refresher.calls(), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(SessionError::Terminal(_)))));
    assert_eq!(session.state().await, SessionState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_attempts_are_spaced() {
    let refresher = FakeRefresher::scripted(
        vec![Err(SessionError::Transient("503".into()))],
        Ok(test_token("t2")),
    )
    .into_arc();
    let session = SessionCoordinator::new(
        refresher.clone(),
        &config(Duration::from_secs(5), Duration::from_secs(10)),
    );

    assert!(session.ensure_valid_session().await.is_err());
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(session.ensure_valid_session().await, Ok("t2".to_string()));

    let times = refresher.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_caller_joining_a_waiting_refresh_does_not_start_another() {
    let refresher = FakeRefresher::scripted(
        vec![Err(SessionError::Transient("503".into()))],
        Ok(test_token("t2")),
    )
    .into_arc();
    let session = SessionCoordinator::new(
        refresher.clone(),
        &config(Duration::from_secs(5), Duration::from_secs(10)),
    );
    assert!(session.ensure_valid_session().await.is_err());

    // Both calls land inside the spacing window
    let (a, b) = tokio::join!(session.ensure_valid_session(), session.ensure_valid_session());

    assert_eq!(a, Ok("t2".to_string()));
    assert_eq!(b, Ok("t2".to_string()));
    assert_eq!(refresher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_timeout_is_transient() {
    let refresher = FakeRefresher::succeeding("late")
        .with_delay(Duration::from_secs(60))
        .into_arc();
    let session = SessionCoordinator::new(
        refresher.clone(),
        &config(Duration::ZERO, Duration::from_secs(10)),
    );

    let err = session.ensure_valid_session().await.unwrap_err();
    assert!(matches!(err, SessionError::Transient(_)));
    assert_eq!(session.state().await, SessionState::Unauthenticated);
    assert_eq!(session.access_token().await, None);
}

#[tokio::test]
async fn test_installed_token_skips_refresh() {
    let refresher = Arc::new(FakeRefresher::succeeding("unused"));
    let session = SessionCoordinator::new(refresher.clone(), &AppConfig::default());

    session.install_token(test_token("from-login")).await;

    assert_eq!(
        session.ensure_valid_session().await,
        Ok("from-login".to_string())
    );
    assert_eq!(refresher.calls(), 0);
}
