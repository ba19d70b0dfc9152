//! Notification worker: consumes order events and performs the notification.
//!
//! # States
//!
//! ```text
//! Connecting ──► Consuming ──► Processing ──► Consuming
//!     │   ▲          │
//!     │   └──────────┘ stream ended / connection lost (fresh retry budget)
//!     ▼
//!   Fatal (retry budget exhausted; the process should exit non-zero)
//! ```
//!
//! # Acknowledgment
//!
//! In [`AckMode::Manual`] (the default) a delivery is acknowledged only after
//! the notifier succeeded. A failed or timed-out notification is nacked with
//! requeue after a pause that doubles per failure of that order, up to
//! [`WorkerConfig::max_requeue_backoff`]. Once an order has failed
//! [`WorkerConfig::max_deliveries`] times it is nacked without requeue and
//! moved to the [`DeadLetterQueue`], so the messages behind it keep flowing.
//! Undecodable payloads go straight to the dead-letter queue.
//!
//! [`AckMode::Auto`] hands settlement to the broker (at-most-once); a failed
//! notification cannot be redelivered and is dead-lettered at once.
//!
//! Redeliveries of an order already notified are acknowledged without calling
//! the notifier again.

use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::metrics::{BROKER_CONNECT_ATTEMPTS, NOTIFICATIONS_DUPLICATES, NOTIFICATIONS_PROCESSED};
use crate::retry::{RetryPolicy, retry_while};
use chrono::Utc;
use futures::StreamExt;
use order_pipeline_core::broker::{
    AckMode, BrokerConnector, BrokerError, BrokerSession, Delivery, DeliveryStream, QueueBinding,
};
use order_pipeline_core::event::OrderEvent;
use order_pipeline_core::notification::{Notifier, NotifyError};
use order_pipeline_core::order::OrderId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

/// Observable worker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Trying to reach the broker (1-based attempt number)
    Connecting {
        /// Current attempt
        attempt: usize,
    },
    /// Waiting for deliveries
    Consuming,
    /// Handling one delivery
    Processing,
    /// Gave up reaching the broker
    Fatal(String),
    /// Shut down on request
    Stopped,
}

/// Errors that end the worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The broker stayed unreachable for the whole retry budget
    #[error("Broker unreachable after {attempts} attempts: {source}")]
    BrokerFatal {
        /// Attempts made
        attempts: usize,
        /// Last connection error
        source: BrokerError,
    },
}

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume (must match the publisher's declaration)
    pub binding: QueueBinding,
    /// Acknowledgment policy
    pub ack_mode: AckMode,
    /// Connection retry budget
    pub connect_policy: RetryPolicy,
    /// Bound on one notification
    pub notify_timeout: Duration,
    /// How many processed order ids to remember for dedupe
    pub dedupe_capacity: usize,
    /// Failed deliveries of one order before it is dead-lettered
    pub max_deliveries: usize,
    /// Pause before requeueing after the first failure
    pub requeue_backoff: Duration,
    /// Ceiling for the requeue pause
    pub max_requeue_backoff: Duration,
}

impl WorkerConfig {
    /// Pause before requeueing an order that has failed `failures` times:
    /// `requeue_backoff * 2^(failures - 1)`, capped at `max_requeue_backoff`.
    #[must_use]
    pub fn requeue_delay(&self, failures: usize) -> Duration {
        let doublings = u32::try_from(failures.saturating_sub(1)).unwrap_or(u32::MAX).min(20);
        self.requeue_backoff
            .saturating_mul(1_u32 << doublings)
            .min(self.max_requeue_backoff)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binding: QueueBinding::order_events(),
            ack_mode: AckMode::Manual,
            connect_policy: RetryPolicy::fixed(30, Duration::from_secs(1)),
            notify_timeout: Duration::from_secs(10),
            dedupe_capacity: 10_000,
            max_deliveries: 5,
            requeue_backoff: Duration::from_millis(200),
            max_requeue_backoff: Duration::from_secs(5),
        }
    }
}

/// Bounded memory of recently notified orders.
#[derive(Debug)]
struct ProcessedOrders {
    capacity: usize,
    order: VecDeque<OrderId>,
    seen: HashSet<OrderId>,
}

impl ProcessedOrders {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, id: &OrderId) -> bool {
        self.seen.contains(id)
    }

    fn insert(&mut self, id: OrderId) {
        if self.capacity == 0 || !self.seen.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}

/// Failed deliveries per order, for orders not yet notified or given up on.
///
/// Bounded like [`ProcessedOrders`]: beyond `capacity` the order that failed
/// longest ago is forgotten and starts from zero if it comes back.
#[derive(Debug)]
struct FailureCounts {
    capacity: usize,
    order: VecDeque<OrderId>,
    counts: HashMap<OrderId, usize>,
}

impl FailureCounts {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            counts: HashMap::new(),
        }
    }

    /// Count one more failure and return the total.
    fn record(&mut self, id: &OrderId) -> usize {
        if let Some(count) = self.counts.get_mut(id) {
            *count += 1;
            return *count;
        }
        self.counts.insert(id.clone(), 1);
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.counts.remove(&oldest);
            }
        }
        1
    }

    fn clear(&mut self, id: &OrderId) {
        if self.counts.remove(id).is_some() {
            self.order.retain(|known| known != id);
        }
    }
}

/// Consumes order events and drives a [`Notifier`].
pub struct NotificationWorker {
    connector: Arc<dyn BrokerConnector>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
    processed: Mutex<ProcessedOrders>,
    failures: Mutex<FailureCounts>,
    dead_letters: Arc<DeadLetterQueue>,
}

impl NotificationWorker {
    /// Creates a worker. Nothing happens until [`run`](Self::run).
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Connecting { attempt: 0 });
        let processed = Mutex::new(ProcessedOrders::new(config.dedupe_capacity));
        let failures = Mutex::new(FailureCounts::new(config.dedupe_capacity));
        Self {
            connector,
            notifier,
            config,
            state,
            processed,
            failures,
            dead_letters: Arc::new(DeadLetterQueue::default()),
        }
    }

    /// Send given-up deliveries to `dead_letters` instead of a private queue.
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Deliveries this worker gave up on.
    #[must_use]
    pub const fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` resolves or the broker is declared unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::BrokerFatal`] once a connect phase exhausts its
    /// retry budget.
    pub async fn run<S>(&self, shutdown: S) -> Result<(), WorkerError>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            let connected = tokio::select! {
                () = &mut shutdown => {
                    self.set_state(WorkerState::Stopped);
                    return Ok(());
                },
                connected = self.connect() => connected,
            };

            let (session, mut deliveries) = match connected {
                Ok(connected) => connected,
                Err(error) => {
                    self.set_state(WorkerState::Fatal(error.to_string()));
                    tracing::error!(%error, "Notification worker giving up");
                    return Err(error);
                },
            };

            self.set_state(WorkerState::Consuming);
            tracing::info!(queue = %self.config.binding.name, ack_mode = %self.config.ack_mode, "Consuming order events");

            loop {
                let next = tokio::select! {
                    () = &mut shutdown => {
                        self.set_state(WorkerState::Stopped);
                        return Ok(());
                    },
                    next = deliveries.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => {
                        self.set_state(WorkerState::Processing);
                        self.process(delivery).await;
                        self.set_state(WorkerState::Consuming);
                    },
                    Some(Err(error)) => {
                        tracing::warn!(%error, "Delivery stream failed, reconnecting");
                        break;
                    },
                    None => {
                        tracing::warn!("Delivery stream ended, reconnecting");
                        break;
                    },
                }
            }

            drop(deliveries);
            drop(session);
        }
    }

    async fn connect(&self) -> Result<(Arc<dyn BrokerSession>, DeliveryStream), WorkerError> {
        let attempts = AtomicUsize::new(0);
        let binding = &self.config.binding;

        let result = retry_while(
            self.config.connect_policy,
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                self.set_state(WorkerState::Connecting { attempt });
                metrics::counter!(BROKER_CONNECT_ATTEMPTS).increment(1);
                async move {
                    let session = self.connector.connect().await?;
                    session.declare(binding).await?;
                    let deliveries = session.consume(binding, self.config.ack_mode).await?;
                    Ok::<_, BrokerError>((session, deliveries))
                }
            },
            |error| {
                !matches!(
                    error,
                    BrokerError::DeclarationMismatch { .. } | BrokerError::UnsupportedBinding { .. }
                )
            },
        )
        .await;

        result.map_err(|source| WorkerError::BrokerFatal {
            attempts: attempts.load(Ordering::SeqCst),
            source,
        })
    }

    async fn process(&self, mut delivery: Delivery) {
        let span = tracing::info_span!(
            "order_notification",
            redelivered = delivery.redelivered,
            order_id = tracing::field::Empty,
        );

        async move {
            let event = match OrderEvent::from_json(&delivery.payload) {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(%error, bytes = delivery.payload.len(), "Discarding undecodable order event");
                    metrics::counter!(NOTIFICATIONS_PROCESSED, "outcome" => "poison").increment(1);
                    self.dead_letter(None, &delivery, error.to_string(), 1);
                    settle(delivery.nack(false).await);
                    return;
                },
            };
            tracing::Span::current().record("order_id", tracing::field::display(&event.order_id));

            if self.already_processed(&event.order_id) {
                tracing::info!("Duplicate delivery, acknowledging without notifying");
                metrics::counter!(NOTIFICATIONS_DUPLICATES).increment(1);
                settle(delivery.ack().await);
                return;
            }

            match self.notify(&event).await {
                Ok(()) => {
                    self.clear_failures(&event.order_id);
                    self.mark_processed(event.order_id.clone());
                    metrics::counter!(NOTIFICATIONS_PROCESSED, "outcome" => "notified").increment(1);
                    settle(delivery.ack().await);
                },
                Err(error) => {
                    let failures = self.record_failure(&event.order_id);
                    let requeue = delivery.is_pending() && failures < self.config.max_deliveries;

                    if requeue {
                        let pause = self.config.requeue_delay(failures);
                        tracing::warn!(%error, failures, pause_ms = pause.as_millis(), "Notification failed, requeueing");
                        metrics::counter!(NOTIFICATIONS_PROCESSED, "outcome" => "requeued").increment(1);
                        tokio::time::sleep(pause).await;
                        settle(delivery.nack(true).await);
                    } else {
                        tracing::error!(%error, failures, "Notification failed, giving up on order");
                        metrics::counter!(NOTIFICATIONS_PROCESSED, "outcome" => "dead_lettered").increment(1);
                        self.clear_failures(&event.order_id);
                        self.dead_letter(
                            Some(event.order_id.clone()),
                            &delivery,
                            error.to_string(),
                            failures,
                        );
                        settle(delivery.nack(false).await);
                    }
                },
            }
        }
        .instrument(span)
        .await;
    }

    async fn notify(&self, event: &OrderEvent) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.config.notify_timeout, self.notifier.notify(event)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError(format!(
                "timed out after {}ms",
                self.config.notify_timeout.as_millis()
            ))),
        }
    }

    fn already_processed(&self, id: &OrderId) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn mark_processed(&self, id: OrderId) {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    fn record_failure(&self, id: &OrderId) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(id)
    }

    fn clear_failures(&self, id: &OrderId) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear(id);
    }

    fn dead_letter(
        &self,
        order_id: Option<OrderId>,
        delivery: &Delivery,
        reason: String,
        deliveries: usize,
    ) {
        self.dead_letters.push(DeadLetter {
            order_id,
            payload: delivery.payload.clone(),
            reason,
            deliveries,
            failed_at: Utc::now(),
        });
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

impl std::fmt::Debug for NotificationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationWorker")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn settle(result: Result<(), BrokerError>) {
    if let Err(error) = result {
        tracing::warn!(%error, "Failed to settle delivery; the broker will redeliver it");
    }
}

/// Notifier that writes the event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        event: &'a OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                order_id = %event.order_id,
                username = %event.username,
                book_id = %event.book_id,
                "NOTIFICATION: {}",
                event.message
            );
            Ok(())
        })
    }
}
