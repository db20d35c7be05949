//! HTTP collaborator tests
//!
//! The real reqwest clients against a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use floorsync::client::sync::{spawn_reachability_probe, Trigger};
use floorsync::client::{
    ConnectivityMonitor, DispatchError, HttpDispatcher, LocalDatabase, MutationQueue,
    RemoteDispatch, RetryPolicy, SessionClient, SessionCoordinator, SessionError,
    SessionRefresher, SyncEngine,
};
use floorsync::shared::{MutationPayload, ValidationDecision, ValidationPayload};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::assert_ok;
use crate::common::{
    check_in, expect_completed, mock_config, mount_refresh_ok, mount_refresh_status,
};

async fn queue_with(payload: MutationPayload) -> (MutationQueue, floorsync::shared::QueuedMutation) {
    let queue = MutationQueue::new(
        LocalDatabase::in_memory().await.unwrap(),
        RetryPolicy::default(),
    );
    let id = queue.enqueue(payload).await.unwrap();
    let mutation = queue.get(id).await.unwrap().unwrap();
    (queue, mutation)
}

#[tokio::test]
async fn test_dispatch_sends_bearer_and_idempotency_key() {
    let server = MockServer::start().await;
    let (_queue, mutation) = queue_with(check_in("E1")).await;

    Mock::given(method("POST"))
        .and(path("/api/attendance"))
        .and(header("authorization", "Bearer t1"))
        .and(header("idempotency-key", mutation.id.to_string().as_str()))
        .and(body_partial_json(json!({ "employeeId": "E1", "action": "check_in" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 42 })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = HttpDispatcher::new(mock_config(&server));
    let receipt = assert_ok!(dispatcher.dispatch(&mutation, "t1").await);

    assert_eq!(receipt.server_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_validation_goes_to_work_entry_path() {
    let server = MockServer::start().await;
    let (_queue, mutation) = queue_with(MutationPayload::Validation(ValidationPayload {
        work_entry_id: "W-17".to_string(),
        supervisor_id: "S1".to_string(),
        decision: ValidationDecision::Approved,
        comment: None,
    }))
    .await;

    Mock::given(method("POST"))
        .and(path("/api/work-entries/W-17/validation"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = HttpDispatcher::new(mock_config(&server));
    let receipt = assert_ok!(dispatcher.dispatch(&mutation, "t1").await);
    assert_eq!(receipt.server_id, None);
}

#[tokio::test]
async fn test_dispatch_status_mapping() {
    let cases = [
        (401, "authorization"),
        (409, "conflict"),
        (422, "validation"),
        (400, "validation"),
        (503, "network"),
        (429, "network"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        let (_queue, mutation) = queue_with(check_in("E1")).await;
        Mock::given(method("POST"))
            .and(path("/api/attendance"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = HttpDispatcher::new(mock_config(&server))
            .dispatch(&mutation, "t1")
            .await
            .unwrap_err();
        let actual = match err {
            DispatchError::Authorization(_) => "authorization",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::Validation(_) => "validation",
            DispatchError::Network(_) => "network",
        };
        assert_eq!(actual, expected, "status {}", status);
    }
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let server = MockServer::start().await;
    let config = mock_config(&server);
    drop(server);

    let (_queue, mutation) = queue_with(check_in("E1")).await;
    let err = HttpDispatcher::new(config)
        .dispatch(&mutation, "t1")
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::Network(_));
}

#[tokio::test]
async fn test_login_returns_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "username": "op1", "password": "secret" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "t-login", "expires_in": 600 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = assert_ok!(SessionClient::new(mock_config(&server)));
    let token = assert_ok!(client.login("op1", "secret").await);

    assert_eq!(token.access_token, "t-login");
    assert_eq!(token.expires_in, Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn test_refresh_status_classification() {
    for (status, terminal) in [(401, true), (404, true), (503, false), (408, false)] {
        let server = MockServer::start().await;
        mount_refresh_status(&server, status).await;

        let client = assert_ok!(SessionClient::new(mock_config(&server)));
        let err = client.refresh().await.unwrap_err();
        assert_eq!(err.is_terminal(), terminal, "status {}", status);
    }
}

#[tokio::test]
async fn test_engine_end_to_end_over_http() {
    let server = MockServer::start().await;
    mount_refresh_ok(&server, "t-refreshed").await;
    Mock::given(method("POST"))
        .and(path("/api/attendance"))
        .and(header("authorization", "Bearer t-refreshed"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "a-1" })))
        .expect(2)
        .mount(&server)
        .await;

    let config = mock_config(&server);
    let session = SessionCoordinator::new(
        Arc::new(assert_ok!(SessionClient::new(config.clone()))),
        config.app(),
    );
    let queue = MutationQueue::new(
        LocalDatabase::in_memory().await.unwrap(),
        RetryPolicy::from_config(config.app()),
    );
    let engine = SyncEngine::new(
        queue,
        session,
        Arc::new(HttpDispatcher::new(config.clone())),
        ConnectivityMonitor::new(true),
        config.app(),
    );

    assert_ok!(engine.queue().enqueue(check_in("E1")).await);
    assert_ok!(engine.queue().enqueue(check_in("E2")).await);

    let report = expect_completed(assert_ok!(engine.run_pass(Trigger::Manual).await));
    assert_eq!((report.synced, report.failed), (2, 0));
    assert!(assert_ok!(engine.queue().list_pending().await).is_empty());
}

#[tokio::test]
async fn test_terminal_refresh_leaves_queue_intact() {
    let server = MockServer::start().await;
    mount_refresh_status(&server, 401).await;

    let config = mock_config(&server);
    let session = SessionCoordinator::new(
        Arc::new(assert_ok!(SessionClient::new(config.clone()))),
        config.app(),
    );
    let queue = MutationQueue::new(
        LocalDatabase::in_memory().await.unwrap(),
        RetryPolicy::default(),
    );
    let engine = SyncEngine::new(
        queue,
        session,
        Arc::new(HttpDispatcher::new(config.clone())),
        ConnectivityMonitor::new(true),
        config.app(),
    );
    assert_ok!(engine.queue().enqueue(check_in("E1")).await);

    let outcome = assert_ok!(engine.run_pass(Trigger::Manual).await);
    assert_matches!(
        outcome,
        floorsync::client::PassOutcome::Deferred(floorsync::client::sync::DeferReason::Session(
            SessionError::Terminal(_)
        ))
    );
    assert_eq!(assert_ok!(engine.queue().list_pending().await).len(), 1);
}

#[tokio::test]
async fn test_reachability_probe_feeds_monitor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = ConnectivityMonitor::new(false);
    let mut transitions = monitor.subscribe();
    let probe = spawn_reachability_probe(
        monitor.clone(),
        reqwest::Client::new(),
        mock_config(&server),
    );

    let status = tokio::time::timeout(Duration::from_secs(5), transitions.recv())
        .await
        .expect("probe never reported")
        .unwrap();
    assert_eq!(status, floorsync::client::NetworkStatus::Online);
    assert!(monitor.is_online());
    probe.abort();
}
