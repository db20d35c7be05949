//! Sync engine integration tests
//!
//! Delivery guarantees of a drain pass: at-least-once delivery, per-item
//! failure isolation, the reentrancy guard and the quarantine policy.

use std::time::Duration;

use assert_matches::assert_matches;
use floorsync::client::sync::{DeferReason, SubmitStatus, SyncService, Trigger};
use floorsync::client::{DispatchError, PassOutcome, SessionError};
use floorsync::shared::{AppConfig, MutationPayload};
use pretty_assertions::assert_eq;

use crate::assert_ok;
use crate::common::{
    assert_pending, check_in, expect_completed, subject, test_config, test_token, EngineHarness,
    FakeDispatcher, FakeRefresher,
};

#[tokio::test]
async fn test_offline_mutation_is_delivered_after_reconnect() {
    let harness = EngineHarness::new(test_config(), FakeDispatcher::new(), false).await;

    assert_ok!(harness.queue().enqueue(check_in("E1")).await);
    assert_pending(harness.queue(), 1).await;

    let outcome = assert_ok!(harness.engine.run_pass(Trigger::Timer).await);
    assert_eq!(outcome, PassOutcome::Deferred(DeferReason::Offline));
    assert_eq!(harness.dispatcher.call_count(), 0);

    harness.monitor.set_online(true);
    let report = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Reconnect).await));

    assert_eq!(report.synced, 1);
    let calls = harness.dispatcher.calls();
    assert_eq!(calls.len(), 1);
    assert_matches!(&calls[0].payload, MutationPayload::Attendance(p) if p.employee_id == "E1");
    assert_pending(harness.queue(), 0).await;
    assert_eq!(assert_ok!(harness.queue().stats().await).synced_unswept, 0);
}

#[tokio::test]
async fn test_one_failure_does_not_block_the_rest() {
    let dispatcher = FakeDispatcher::new()
        .failing_for("E2", DispatchError::Validation("unknown process".into()));
    let harness = EngineHarness::new(test_config(), dispatcher, true).await;

    for employee in ["E1", "E2", "E3"] {
        assert_ok!(harness.queue().enqueue(check_in(employee)).await);
    }

    let report = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Manual).await));

    assert_eq!((report.synced, report.failed), (2, 1));
    assert_eq!(harness.dispatcher.subjects(), vec!["E1", "E2", "E3"]);

    let pending = assert_ok!(harness.queue().list_pending().await);
    assert_eq!(pending.len(), 1);
    assert_eq!(subject(&pending[0]), "E2");
    assert_eq!(pending[0].attempts, 1);

    let rate = harness.engine.metrics().await.success_rate();
    assert!((rate - 2.0 / 3.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_transient_failure_is_retried_next_pass() {
    let dispatcher = FakeDispatcher::new().fail_next(DispatchError::Network("reset".into()));
    let harness = EngineHarness::new(test_config(), dispatcher, true).await;
    let id = assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let first = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));
    assert_eq!(first.failed, 1);
    assert!(assert_ok!(harness.queue().get(id).await).is_some());

    let second = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));
    assert_eq!(second.synced, 1);
    assert!(assert_ok!(harness.queue().get(id).await).is_none());
    assert_eq!(harness.dispatcher.call_count(), 2);
}

#[tokio::test]
async fn test_trigger_during_pass_is_ignored() {
    let (dispatcher, gate) = FakeDispatcher::new().gated();
    let harness = EngineHarness::new(test_config(), dispatcher, true).await;
    assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.run_pass(Trigger::Timer).await });
    harness.dispatcher.wait_until_entered().await;

    assert!(harness.engine.is_pass_running());
    let second = assert_ok!(harness.engine.run_pass(Trigger::Manual).await);
    assert_eq!(second, PassOutcome::AlreadyRunning);

    gate.add_permits(1);
    let first = expect_completed(assert_ok!(assert_ok!(running.await)));

    assert_eq!(first.synced, 1);
    assert_eq!(harness.dispatcher.call_count(), 1);
    assert!(!harness.engine.is_pass_running());
    assert_eq!(harness.engine.metrics().await.skipped_passes, 1);
}

#[tokio::test]
async fn test_submit_during_pass_waits_for_next_pass() {
    let (dispatcher, gate) = FakeDispatcher::new().gated();
    let harness = EngineHarness::new(test_config(), dispatcher, true).await;
    assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move { engine.run_pass(Trigger::Timer).await });
    harness.dispatcher.wait_until_entered().await;

    let submitted = assert_ok!(harness.engine.submit(check_in("E2")).await);
    assert_eq!(submitted.status, SubmitStatus::Queued);

    gate.add_permits(1);
    expect_completed(assert_ok!(assert_ok!(running.await)));
    assert_eq!(harness.dispatcher.subjects(), vec!["E1"]);

    gate.add_permits(1);
    let next = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));
    assert_eq!(next.synced, 1);
    assert_eq!(harness.dispatcher.subjects(), vec!["E1", "E2"]);
    assert_pending(harness.queue(), 0).await;
}

#[tokio::test]
async fn test_session_failure_defers_pass() {
    let harness = EngineHarness::with_refresher(
        test_config(),
        FakeDispatcher::new(),
        FakeRefresher::failing(SessionError::Terminal("401".into())),
        true,
    )
    .await;
    assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let outcome = assert_ok!(harness.engine.run_pass(Trigger::Timer).await);

    assert_matches!(
        outcome,
        PassOutcome::Deferred(DeferReason::Session(SessionError::Terminal(_)))
    );
    assert_eq!(harness.dispatcher.call_count(), 0);
    assert_pending(harness.queue(), 1).await;
    assert_eq!(harness.engine.status().await.errors.len(), 1);
}

#[tokio::test]
async fn test_dispatch_timeout_keeps_item_queued() {
    let config = AppConfig::builder()
        .dispatch_timeout(Duration::from_millis(50))
        .refresh_min_interval(Duration::ZERO)
        .build()
        .unwrap();
    let dispatcher = FakeDispatcher::new().with_delay(Duration::from_secs(5));
    let harness = EngineHarness::new(config, dispatcher, true).await;
    let id = assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let report = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));

    assert_eq!(report.failed, 1);
    let stored = assert_ok!(harness.queue().get(id).await).unwrap();
    assert!(!stored.synced);
    assert!(stored.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_repeated_rejections_quarantine_item() {
    let config = AppConfig::builder()
        .max_rejections(2)
        .refresh_min_interval(Duration::ZERO)
        .build()
        .unwrap();
    let dispatcher =
        FakeDispatcher::new().failing_for("E1", DispatchError::Conflict("shift closed".into()));
    let harness = EngineHarness::new(config, dispatcher, true).await;
    let id = assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let first = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));
    assert_eq!(first.quarantined, 0);
    let second = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));
    assert_eq!(second.quarantined, 1);

    assert_eq!(
        assert_ok!(harness.engine.run_pass(Trigger::Timer).await),
        PassOutcome::Idle
    );
    let status = harness.engine.status().await;
    assert_eq!((status.pending_mutations, status.quarantined_mutations), (0, 1));

    // Operator fixes the server side and puts the item back
    harness.dispatcher.clear_failures();
    assert!(assert_ok!(harness.queue().requeue(id).await));
    let third = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Manual).await));
    assert_eq!(third.synced, 1);
    assert!(assert_ok!(harness.queue().list_quarantined().await).is_empty());
}

#[tokio::test]
async fn test_rejected_session_stops_pass_and_clears_token() {
    let dispatcher =
        FakeDispatcher::new().failing_for("E2", DispatchError::Authorization("401".into()));
    let harness = EngineHarness::new(test_config(), dispatcher, true).await;
    for employee in ["E1", "E2", "E3"] {
        assert_ok!(harness.queue().enqueue(check_in(employee)).await);
    }

    let report = expect_completed(assert_ok!(harness.engine.run_pass(Trigger::Timer).await));

    assert!(report.session_rejected);
    assert_eq!(harness.dispatcher.subjects(), vec!["E1", "E2"]);
    assert_eq!(harness.engine.session().access_token().await, None);

    let pending: Vec<String> = assert_ok!(harness.queue().list_pending().await)
        .iter()
        .map(subject)
        .collect();
    assert_eq!(pending, vec!["E2", "E3"]);
}

#[tokio::test]
async fn test_submit_online_dispatches_once() {
    let harness = EngineHarness::new(test_config(), FakeDispatcher::new(), true).await;
    harness.engine.session().install_token(test_token("token")).await;

    let outcome = assert_ok!(harness.engine.submit(check_in("E1")).await);
    assert_eq!(outcome.status, SubmitStatus::Synced);
    assert_eq!(harness.refresher.calls(), 0);

    assert_eq!(
        assert_ok!(harness.engine.run_pass(Trigger::Timer).await),
        PassOutcome::Idle
    );
    assert_eq!(harness.dispatcher.call_count(), 1);
}

#[tokio::test]
async fn test_service_drains_on_reconnect() {
    let config = AppConfig::builder()
        .sync_interval(Duration::from_secs(3600))
        .refresh_min_interval(Duration::ZERO)
        .build()
        .unwrap();
    let harness = EngineHarness::new(config.clone(), FakeDispatcher::new(), false).await;
    assert_ok!(harness.queue().enqueue(check_in("E1")).await);

    let mut service = SyncService::new(harness.engine.clone(), &config);
    let mut reports = service.subscribe_reports();
    assert_ok!(service.start());

    // Let the immediate first tick run its (offline) pass to the end
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.engine.metrics().await.deferred_passes == 0
            || harness.engine.is_pass_running()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first pass never ran");

    harness.monitor.set_online(true);
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("no pass report after reconnect")
        .unwrap();

    assert_eq!(report.trigger, Trigger::Reconnect);
    assert_eq!(report.synced, 1);
    assert_pending(harness.queue(), 0).await;
    service.stop();
}
