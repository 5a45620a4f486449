//! Integration tests for batch dispatch over a scripted mock transport.

use std::sync::Arc;
use std::time::Duration;

use digest_dispatch::mocks::{test_message, Fault, MockConnector, MockWire};
use digest_dispatch::{DispatchConfig, DispatchErrorKind, DispatchPolicy, Dispatcher, Message};

fn config_with_policy(policy: DispatchPolicy) -> DispatchConfig {
    DispatchConfig::builder()
        .host("smtp.example.com")
        .port(465)
        .credentials("digest@example.com", "app-password")
        .sender("digest@example.com", "Digest Service")
        .policy(policy)
        .build()
        .unwrap()
}

fn fast_policy() -> DispatchPolicy {
    DispatchPolicy {
        pacing_min: Duration::ZERO,
        pacing_max: Duration::ZERO,
        reconcile_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

fn dispatcher(wire: &MockWire) -> Dispatcher {
    Dispatcher::with_connector(
        config_with_policy(fast_policy()),
        Arc::new(MockConnector::new(wire.clone())),
    )
}

fn batch(recipients: &[&str]) -> Vec<Message> {
    recipients.iter().map(|r| test_message(r)).collect()
}

// Scenario A: five messages, all succeed first try.
#[tokio::test]
async fn all_messages_succeed_first_try() {
    let wire = MockWire::new();
    let dispatcher = dispatcher(&wire);

    let recipients = ["r1@x.com", "r2@x.com", "r3@x.com", "r4@x.com", "r5@x.com"];
    let report = dispatcher.send_batch(batch(&recipients)).await.unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.delivered, 5);
    assert_eq!(report.recovered, 0);
    assert!(report.is_complete());
    assert!(dispatcher.unresolved().is_empty());

    let mut transmitted = wire.transmitted();
    transmitted.sort();
    assert_eq!(transmitted.len(), 5);

    // One connect, one graceful close.
    assert_eq!(wire.connect_count(), 1);
    assert_eq!(wire.quit_count(), 1);
}

// Scenario B: one message hits a session drop, succeeds on the inline retry.
#[tokio::test]
async fn disconnect_is_repaired_inline() {
    let wire = MockWire::new();
    wire.fail_recipient_once("r3@x.com", Fault::Disconnect);
    let dispatcher = dispatcher(&wire);

    let report = dispatcher
        .send_batch(batch(&["r1@x.com", "r2@x.com", "r3@x.com"]))
        .await
        .unwrap();

    assert_eq!(report.delivered, 3);
    assert!(report.is_complete());

    // Initial connect plus exactly one reconnect.
    assert_eq!(wire.connect_count(), 2);
    // The dropped message was attempted twice: original plus inline retry.
    assert_eq!(wire.attempts_for("r3@x.com"), 2);
    assert_eq!(dispatcher.metrics().reconnects.load(std::sync::atomic::Ordering::Relaxed), 1);
}

// Scenario C: one message is rejected on every attempt including the
// reconciliation retries; it ends in the residual ledger.
#[tokio::test]
async fn persistent_rejection_survives_reconciliation() {
    let wire = MockWire::new();
    wire.fail_recipient_always("r2@x.com", Fault::Reject(550));
    let dispatcher = dispatcher(&wire);

    let report = dispatcher
        .send_batch(batch(&["r1@x.com", "r2@x.com", "r3@x.com"]))
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].recipient().email, "r2@x.com");
    assert_eq!(dispatcher.unresolved().len(), 1);

    // Main pass plus three reconciliation attempts.
    assert_eq!(wire.attempts_for("r2@x.com"), 4);

    // The batch still tore the session down gracefully.
    assert_eq!(wire.quit_count(), 1);
}

// Scenario D: the initial connect fails; the batch aborts with zero
// delivery attempts.
#[tokio::test]
async fn connect_failure_aborts_batch() {
    let wire = MockWire::new();
    wire.fail_next_connect(DispatchErrorKind::Authentication);
    let dispatcher = dispatcher(&wire);

    let err = dispatcher
        .send_batch(batch(&["r1@x.com", "r2@x.com"]))
        .await
        .unwrap_err();

    assert!(err.is_connection_failure());
    assert_eq!(wire.connect_count(), 0);
    assert_eq!(wire.transmit_attempts(), 0);
    assert_eq!(wire.quit_count(), 0);
}

// A message that fails the inline retry lands in the ledger and is
// recovered by reconciliation.
#[tokio::test]
async fn reconciliation_recovers_ledger_entries() {
    let wire = MockWire::new();
    wire.fail_recipient_once("r1@x.com", Fault::Reject(451));
    let dispatcher = dispatcher(&wire);

    let report = dispatcher.send_batch(batch(&["r1@x.com"])).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.recovered, 1);
    assert!(report.is_complete());
    assert!(dispatcher.unresolved().is_empty());

    // One failed main-pass attempt, one successful reconciliation attempt.
    assert_eq!(wire.attempts_for("r1@x.com"), 2);
}

// Two consecutive drops exhaust the inline retry; reconciliation repairs
// the session and redelivers.
#[tokio::test]
async fn double_disconnect_falls_through_to_reconciliation() {
    let wire = MockWire::new();
    wire.fail_recipient_once("r1@x.com", Fault::Disconnect);
    wire.fail_recipient_once("r1@x.com", Fault::Disconnect);
    let dispatcher = dispatcher(&wire);

    let report = dispatcher.send_batch(batch(&["r1@x.com"])).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.recovered, 1);
    // Original, inline retry, reconciliation redelivery.
    assert_eq!(wire.attempts_for("r1@x.com"), 3);
}

// The admission semaphore never lets more than the configured number of
// units hold a slot at once.
#[tokio::test]
async fn concurrency_ceiling_is_respected() {
    let wire = MockWire::new();
    let policy = DispatchPolicy {
        pacing_min: Duration::from_millis(5),
        pacing_max: Duration::from_millis(5),
        reconcile_backoff: Duration::from_millis(1),
        ..Default::default()
    };
    let dispatcher = Dispatcher::with_connector(
        config_with_policy(policy),
        Arc::new(MockConnector::new(wire.clone())),
    );

    let recipients: Vec<String> = (0..10).map(|i| format!("r{}@x.com", i)).collect();
    let refs: Vec<&str> = recipients.iter().map(String::as_str).collect();
    let report = dispatcher.send_batch(batch(&refs)).await.unwrap();

    assert_eq!(report.delivered, 10);
    let high_water = dispatcher.metrics().in_flight_high_water();
    assert!(high_water >= 1);
    assert!(high_water <= 3, "observed {} units in flight", high_water);
}

// An empty batch never opens a session.
#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let wire = MockWire::new();
    let dispatcher = dispatcher(&wire);

    let report = dispatcher.send_batch(Vec::new()).await.unwrap();

    assert_eq!(report.total, 0);
    assert!(report.is_complete());
    assert_eq!(wire.connect_count(), 0);
    assert_eq!(wire.quit_count(), 0);
}

// Reconnect failures during the inline repair count as per-message
// failures and do not abort the batch.
#[tokio::test]
async fn reconnect_failure_is_isolated() {
    let wire = MockWire::new();
    wire.fail_recipient_once("r1@x.com", Fault::Disconnect);
    wire.fail_next_connect(DispatchErrorKind::ConnectionRefused);
    let dispatcher = dispatcher(&wire);

    let report = dispatcher
        .send_batch(batch(&["r1@x.com", "r2@x.com"]))
        .await
        .unwrap();

    // The failed reconnect pushed r1 into the ledger; reconciliation then
    // reconnected and redelivered it.
    assert_eq!(report.delivered, 2);
    assert_eq!(report.recovered, 1);
    assert!(report.is_complete());
}

// Faults on different recipients stay isolated from their siblings.
#[tokio::test]
async fn sibling_failures_do_not_cancel_units() {
    let wire = MockWire::new();
    wire.fail_recipient_always("r2@x.com", Fault::Reject(550));
    wire.fail_recipient_once("r4@x.com", Fault::Disconnect);
    let dispatcher = dispatcher(&wire);

    let recipients = ["r1@x.com", "r2@x.com", "r3@x.com", "r4@x.com", "r5@x.com"];
    let report = dispatcher.send_batch(batch(&recipients)).await.unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.delivered, 4);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].recipient().email, "r2@x.com");
}
