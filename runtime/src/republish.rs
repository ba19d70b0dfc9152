//! Backlog of order events that were recorded but not yet published.
//!
//! When the notification leg of a placement fails, the orchestrator pushes the
//! event here and the [`Republisher`] task retries it in the background until
//! the broker accepts it or the entry runs out of attempts.
//!
//! # Features
//!
//! - Bounded queue with configurable max size
//! - FIFO ordering (oldest entries dropped when full)
//! - Thread-safe for concurrent access
//! - `republish.backlog` gauge kept current

use crate::metrics::{REPUBLISH_BACKLOG, REPUBLISH_DROPPED};
use crate::publisher::EventPublisher;
use chrono::{DateTime, Utc};
use order_pipeline_core::event::OrderEvent;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default number of events the backlog holds.
pub const DEFAULT_CAPACITY: usize = 10_000;
/// Default attempts per event before it is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: usize = 20;
/// Default pause between drain passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// An event waiting to be republished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// The event to publish
    pub event: OrderEvent,

    /// Publish attempts made so far (including the original one)
    pub attempts: usize,

    /// The error message from the last failure
    pub last_error: String,

    /// When the original publish failed
    pub first_failed_at: DateTime<Utc>,
}

/// Bounded FIFO of [`PendingEvent`]s.
///
/// An entry stays queued while the [`Republisher`] publishes it and is removed
/// only once the broker accepted it, so [`len`](Self::len) and the backlog
/// gauge count in-flight events too.
#[derive(Debug)]
pub struct RepublishQueue {
    backlog: Mutex<Backlog>,
    max_size: usize,
}

#[derive(Debug, Default)]
struct Backlog {
    entries: VecDeque<(u64, PendingEvent)>,
    next_seq: u64,
}

impl RepublishQueue {
    /// Create a new queue holding at most `max_size` events (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            backlog: Mutex::new(Backlog::default()),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event whose first publish failed.
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(&self, event: OrderEvent, error_message: String) {
        let mut backlog = self.lock();

        if backlog.entries.len() >= self.max_size {
            if let Some((_, dropped)) = backlog.entries.pop_front() {
                metrics::counter!(REPUBLISH_DROPPED, "reason" => "capacity").increment(1);
                tracing::error!(
                    order_id = %dropped.event.order_id,
                    max_size = self.max_size,
                    "Republish queue at capacity, dropping oldest event"
                );
            }
        }

        tracing::warn!(
            order_id = %event.order_id,
            queue_size = backlog.entries.len() + 1,
            "Order event queued for republish"
        );
        let seq = backlog.next_seq;
        backlog.next_seq += 1;
        backlog.entries.push_back((
            seq,
            PendingEvent {
                event,
                attempts: 1,
                last_error: error_message,
                first_failed_at: Utc::now(),
            },
        ));
        record_backlog(backlog.entries.len());
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<PendingEvent> {
        self.front().map(|(_, entry)| entry)
    }

    fn front(&self) -> Option<(u64, PendingEvent)> {
        self.lock().entries.front().cloned()
    }

    /// Drop entry `seq` after a successful publish. The entry may already be
    /// gone if a full queue evicted it meanwhile.
    fn remove(&self, seq: u64) {
        let mut backlog = self.lock();
        backlog.entries.retain(|(known, _)| *known != seq);
        record_backlog(backlog.entries.len());
    }

    /// Count a failed publish of entry `seq`. Returns the entry if it has now
    /// used up `max_attempts` and was removed.
    fn record_failure(&self, seq: u64, error: String, max_attempts: usize) -> Option<PendingEvent> {
        let mut backlog = self.lock();
        let index = backlog.entries.iter().position(|(known, _)| *known == seq)?;

        let exhausted = {
            let (_, entry) = &mut backlog.entries[index];
            entry.attempts += 1;
            entry.last_error = error;
            entry.attempts >= max_attempts
        };
        if !exhausted {
            return None;
        }

        let removed = backlog.entries.remove(index).map(|(_, entry)| entry);
        record_backlog(backlog.entries.len());
        removed
    }
}

impl Default for RepublishQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn record_backlog(len: usize) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(REPUBLISH_BACKLOG).set(len as f64);
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events the broker accepted
    pub published: usize,
    /// Events abandoned after exhausting their attempts
    pub abandoned: usize,
    /// Events still waiting
    pub remaining: usize,
}

/// Background task that empties the [`RepublishQueue`].
#[derive(Debug)]
pub struct Republisher {
    queue: Arc<RepublishQueue>,
    publisher: Arc<EventPublisher>,
    interval: Duration,
    max_attempts: usize,
}

impl Republisher {
    /// Creates a republisher with default interval and attempt budget.
    #[must_use]
    pub const fn new(queue: Arc<RepublishQueue>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            queue,
            publisher,
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the pause between drain passes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets how many publish attempts an event gets before it is abandoned.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// One pass over the backlog, oldest first.
    ///
    /// Stops at the first failure so a down broker costs one attempt per
    /// pass, not one per event. Events pushed during the pass wait for the
    /// next one.
    pub async fn drain_once(&self) -> DrainReport {
        let mut report = DrainReport::default();

        for _ in 0..self.queue.len() {
            let Some((seq, entry)) = self.queue.front() else {
                break;
            };

            match self.publisher.publish(&entry.event).await {
                Ok(()) => {
                    self.queue.remove(seq);
                    report.published += 1;
                    tracing::info!(
                        order_id = %entry.event.order_id,
                        attempts = entry.attempts + 1,
                        "Order event republished"
                    );
                },
                Err(error) => {
                    let abandoned =
                        self.queue.record_failure(seq, error.to_string(), self.max_attempts);
                    if let Some(entry) = abandoned {
                        report.abandoned += 1;
                        metrics::counter!(REPUBLISH_DROPPED, "reason" => "attempts").increment(1);
                        tracing::error!(
                            order_id = %entry.event.order_id,
                            attempts = entry.attempts,
                            first_failed_at = %entry.first_failed_at,
                            error = %entry.last_error,
                            "Abandoning order event after repeated publish failures"
                        );
                    }
                    break;
                },
            }
        }

        report.remaining = self.queue.len();
        report
    }

    /// Drain periodically until `shutdown` resolves.
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()> + Send,
    {
        tracing::info!(interval_ms = self.interval.as_millis(), "Republisher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if !self.queue.is_empty() {
                        let report = self.drain_once().await;
                        tracing::debug!(?report, "Republish pass finished");
                    }
                }
            }
        }

        tracing::info!(backlog = self.queue.len(), "Republisher stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use order_pipeline_core::broker::QueueBinding;
    use order_pipeline_core::order::{OrderId, OrderRecord, ProductRecord};
    use order_pipeline_testing::InMemoryBroker;

    fn event(id: &str) -> OrderEvent {
        let product = ProductRecord {
            id: "b1".into(),
            title: "Dune".into(),
            author: "Herbert".into(),
        };
        let record =
            OrderRecord::from_product(OrderId::new(id.into()), &product, "alice", Utc::now());
        OrderEvent::from_record(&record, Utc::now())
    }

    fn setup(broker: &InMemoryBroker) -> (Arc<RepublishQueue>, Republisher) {
        let queue = Arc::new(RepublishQueue::new(10));
        let publisher = Arc::new(EventPublisher::new(
            Arc::new(broker.clone()),
            QueueBinding::order_events(),
        ));
        let republisher = Republisher::new(Arc::clone(&queue), publisher).with_max_attempts(3);
        (queue, republisher)
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = RepublishQueue::new(2);
        queue.push(event("ord_1"), "down".into());
        queue.push(event("ord_2"), "down".into());
        queue.push(event("ord_3"), "down".into());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().event.order_id.as_str(), "ord_2");
    }

    #[tokio::test]
    async fn drains_in_order_once_broker_recovers() {
        let broker = InMemoryBroker::new();
        let (queue, republisher) = setup(&broker);
        queue.push(event("ord_1"), "down".into());
        queue.push(event("ord_2"), "down".into());

        broker.set_publish_failing(true);
        let report = republisher.drain_once().await;
        assert_eq!(report.published, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(queue.peek().unwrap().attempts, 2);

        broker.set_publish_failing(false);
        let report = republisher.drain_once().await;
        assert_eq!(report.published, 2);
        assert!(queue.is_empty());

        let ids: Vec<_> = broker
            .published_events("order_events")
            .into_iter()
            .map(|e| e.order_id.to_string())
            .collect();
        assert_eq!(ids, vec!["ord_1", "ord_2"]);
    }

    #[tokio::test]
    async fn abandons_after_max_attempts() {
        let broker = InMemoryBroker::new();
        broker.set_publish_failing(true);
        let (queue, republisher) = setup(&broker);
        queue.push(event("ord_1"), "down".into());

        republisher.drain_once().await;
        let report = republisher.drain_once().await;

        assert_eq!(report.abandoned, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_the_newest_event() {
        let queue = RepublishQueue::new(0);
        assert_eq!(queue.max_size(), 1);

        queue.push(event("ord_1"), "down".into());
        queue.push(event("ord_2"), "down".into());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().event.order_id.as_str(), "ord_2");
    }

    #[tokio::test]
    async fn event_counts_as_backlog_while_being_published() {
        let broker = InMemoryBroker::new();
        let (queue, republisher) = setup(&broker);
        queue.push(event("ord_1"), "down".into());
        broker.set_publish_delay(Some(Duration::from_millis(200)));

        let republisher = Arc::new(republisher);
        let drain = tokio::spawn({
            let republisher = Arc::clone(&republisher);
            async move { republisher.drain_once().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());

        let report = drain.await.unwrap();
        assert_eq!(report.published, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn events_pushed_during_a_pass_keep_their_place() {
        let broker = InMemoryBroker::new();
        let (queue, republisher) = setup(&broker);
        queue.push(event("ord_1"), "down".into());
        broker.set_publish_delay(Some(Duration::from_millis(100)));

        let republisher = Arc::new(republisher);
        let drain = tokio::spawn({
            let republisher = Arc::clone(&republisher);
            async move { republisher.drain_once().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(event("ord_2"), "down".into());

        let report = drain.await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.peek().unwrap().event.order_id.as_str(), "ord_2");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let (queue, republisher) = setup(&broker);
        queue.push(event("ord_1"), "down".into());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(republisher.with_interval(Duration::from_millis(10)).run(async {
            let _ = rx.await;
        }));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(broker.published("order_events").len(), 1);
    }
}
