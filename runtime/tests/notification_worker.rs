//! Integration tests for the notification worker
//!
//! Drives `NotificationWorker` against the in-memory broker: connection retry
//! budget, acknowledgment policy, poison payloads, duplicate suppression,
//! dead-lettering of orders that keep failing, and reconnection after a
//! dropped connection.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Utc;
use order_pipeline_core::broker::{AckMode, BrokerConnector, OutboundMessage, QueueBinding};
use order_pipeline_core::event::{CONTENT_TYPE_JSON, OrderEvent};
use order_pipeline_core::order::{OrderId, OrderRecord, ProductRecord};
use order_pipeline_runtime::{
    DeadLetterQueue, NotificationWorker, RetryPolicy, WorkerConfig, WorkerError, WorkerState,
};
use order_pipeline_testing::{InMemoryBroker, RecordingNotifier, init_test_tracing};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

// ============================================================================
// Test Fixtures
// ============================================================================

const QUEUE: &str = "order_events";
const WAIT: Duration = Duration::from_secs(5);

fn event(id: &str) -> OrderEvent {
    let product = ProductRecord {
        id: "b1".into(),
        title: "Dune".into(),
        author: "Herbert".into(),
    };
    let record = OrderRecord::from_product(OrderId::new(id.into()), &product, "alice", Utc::now());
    OrderEvent::from_record(&record, Utc::now())
}

fn config(ack_mode: AckMode, attempts: usize) -> WorkerConfig {
    WorkerConfig {
        ack_mode,
        connect_policy: RetryPolicy::fixed(attempts, Duration::from_millis(10)),
        notify_timeout: Duration::from_millis(200),
        requeue_backoff: Duration::from_millis(5),
        max_requeue_backoff: Duration::from_millis(20),
        ..WorkerConfig::default()
    }
}

struct Running {
    state: watch::Receiver<WorkerState>,
    dead_letters: Arc<DeadLetterQueue>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), WorkerError>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn start(broker: &InMemoryBroker, notifier: &RecordingNotifier, config: WorkerConfig) -> Running {
    init_test_tracing();
    let dead_letters = Arc::new(DeadLetterQueue::new(10));
    let worker = Arc::new(
        NotificationWorker::new(Arc::new(broker.clone()), Arc::new(notifier.clone()), config)
            .with_dead_letters(Arc::clone(&dead_letters)),
    );
    let state = worker.state();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move {
            worker
                .run(async {
                    let _ = stopped.await;
                })
                .await
        }
    });
    Running {
        state,
        dead_letters,
        stop,
        task,
    }
}

async fn publish(broker: &InMemoryBroker, event: &OrderEvent) {
    let session = broker.connect().await.unwrap();
    let binding = QueueBinding::order_events();
    session.declare(&binding).await.unwrap();
    let message = OutboundMessage::new(event.to_json().unwrap(), CONTENT_TYPE_JSON)
        .with_key(event.order_id.as_str());
    session.publish(&binding, message).await.unwrap();
}

async fn wait_for(description: &str, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"));
}

async fn wait_for_state(state: &mut watch::Receiver<WorkerState>, wanted: &WorkerState) {
    tokio::time::timeout(WAIT, state.wait_for(|s| s == wanted))
        .await
        .expect("timed out waiting for worker state")
        .expect("worker dropped its state channel");
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn connects_once_broker_becomes_reachable() {
    let broker = InMemoryBroker::new();
    broker.fail_next_connects(3);
    let notifier = RecordingNotifier::new();

    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    assert_eq!(broker.connect_attempts(), 4);
    running.stop().await;
}

#[tokio::test]
async fn exhausted_budget_is_fatal() {
    let broker = InMemoryBroker::new();
    broker.set_unreachable(true);
    let notifier = RecordingNotifier::new();

    let running = start(&broker, &notifier, config(AckMode::Manual, 3));
    let result = tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();

    match result {
        Err(WorkerError::BrokerFatal { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected fatal error, got {other:?}"),
    }
    assert_eq!(broker.connect_attempts(), 3);
    assert!(matches!(*running.state.borrow(), WorkerState::Fatal(_)));
}

#[tokio::test]
async fn conflicting_queue_is_fatal_without_retrying() {
    let broker = InMemoryBroker::new();
    let mut transient = QueueBinding::order_events();
    transient.auto_delete = true;
    broker.predeclare(transient);
    let notifier = RecordingNotifier::new();

    let running = start(&broker, &notifier, config(AckMode::Manual, 5));
    let result = tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();

    assert!(matches!(result, Err(WorkerError::BrokerFatal { attempts: 1, .. })));
}

#[tokio::test]
async fn reconnects_after_connection_loss() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    broker.drop_connections();
    wait_for("a second connection", || broker.connect_attempts() >= 2).await;
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_after")).await;
    wait_for("notification after reconnect", || notifier.sent().len() == 1).await;

    running.stop().await;
}

// ============================================================================
// Acknowledgment
// ============================================================================

#[tokio::test]
async fn successful_notification_is_acknowledged() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_1")).await;
    wait_for("ack", || broker.acked(QUEUE).len() == 1).await;

    assert_eq!(notifier.sent()[0].order_id.as_str(), "ord_1");
    assert_eq!(broker.unacked_len(QUEUE), 0);
    running.stop().await;
}

#[tokio::test]
async fn failed_notification_is_requeued_and_retried() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    notifier.fail_next(1);
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_1")).await;
    wait_for("ack after redelivery", || broker.acked(QUEUE).len() == 1).await;

    assert!(broker.acked(QUEUE)[0].redelivered);
    assert_eq!(notifier.sent().len(), 1);
    running.stop().await;
}

#[tokio::test]
async fn stalled_notification_times_out_and_is_requeued() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    notifier.stall_for(Some(Duration::from_secs(2)));
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_1")).await;
    wait_for("a stalled attempt", || notifier.attempts() >= 1).await;

    notifier.stall_for(None);
    wait_for("ack after timeout", || broker.acked(QUEUE).len() == 1).await;
    assert!(broker.acked(QUEUE)[0].redelivered);
    running.stop().await;
}

#[tokio::test]
async fn poison_payload_is_discarded_and_worker_keeps_going() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    broker.inject(QUEUE, b"not json at all");
    publish(&broker, &event("ord_2")).await;

    wait_for("good event processed", || notifier.sent().len() == 1).await;
    assert_eq!(broker.discarded(QUEUE).len(), 1);
    assert_eq!(broker.ready_len(QUEUE), 0);

    let dead = running.dead_letters.entries();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].order_id, None);
    assert_eq!(dead[0].payload, b"not json at all");
    running.stop().await;
}

#[tokio::test]
async fn order_that_keeps_failing_is_dead_lettered_and_does_not_block_the_queue() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    notifier.always_fail_for("ord_bad");
    let config = WorkerConfig {
        max_deliveries: 3,
        ..config(AckMode::Manual, 10)
    };
    let mut running = start(&broker, &notifier, config);
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_bad")).await;
    publish(&broker, &event("ord_good")).await;

    wait_for("ord_good notified", || notifier.sent().len() == 1).await;
    assert_eq!(notifier.sent()[0].order_id.as_str(), "ord_good");
    assert_eq!(notifier.attempts_for("ord_bad"), 3);

    let dead = running.dead_letters.entries();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].order_id.as_ref().map(OrderId::as_str), Some("ord_bad"));
    assert_eq!(dead[0].deliveries, 3);
    assert!(dead[0].reason.contains("ord_bad"));

    assert_eq!(broker.discarded(QUEUE).len(), 1);
    assert_eq!(broker.acked(QUEUE).len(), 1);
    assert_eq!(broker.ready_len(QUEUE), 0);
    assert_eq!(broker.unacked_len(QUEUE), 0);
    running.stop().await;
}

#[tokio::test]
async fn order_recovering_within_the_limit_is_not_dead_lettered() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    notifier.fail_next(2);
    let config = WorkerConfig {
        max_deliveries: 3,
        ..config(AckMode::Manual, 10)
    };
    let mut running = start(&broker, &notifier, config);
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_1")).await;
    wait_for("ord_1 acked", || broker.acked(QUEUE).len() == 1).await;

    assert_eq!(notifier.attempts_for("ord_1"), 3);
    assert!(broker.discarded(QUEUE).is_empty());
    assert!(running.dead_letters.is_empty());
    running.stop().await;
}

#[tokio::test]
async fn duplicate_delivery_is_not_renotified() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    let mut running = start(&broker, &notifier, config(AckMode::Manual, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    let event = event("ord_dup");
    publish(&broker, &event).await;
    publish(&broker, &event).await;

    wait_for("both acked", || broker.acked(QUEUE).len() == 2).await;
    assert_eq!(notifier.sent().len(), 1);
    running.stop().await;
}

#[tokio::test]
async fn auto_ack_mode_never_requeues() {
    let broker = InMemoryBroker::new();
    let notifier = RecordingNotifier::new();
    notifier.fail_next(1);
    let mut running = start(&broker, &notifier, config(AckMode::Auto, 10));
    wait_for_state(&mut running.state, &WorkerState::Consuming).await;

    publish(&broker, &event("ord_lost")).await;
    wait_for("delivery consumed", || broker.acked(QUEUE).len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(notifier.sent().is_empty());
    assert_eq!(broker.ready_len(QUEUE), 0);
    assert_eq!(broker.unacked_len(QUEUE), 0);
    assert_eq!(running.dead_letters.len(), 1);
    running.stop().await;
}
