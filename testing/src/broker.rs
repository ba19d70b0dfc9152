//! In-process broker for publisher and worker tests.
//!
//! Behaves like a single-node queueing broker:
//! - queues must be declared before use, and re-declarations must match
//! - manual-ack deliveries sit in an unacked set until settled
//! - `nack(requeue = true)` puts the message back at the head, marked redelivered
//! - dropping connections closes every open session and requeues unacked messages
//!
//! Failure injection covers connect refusals, publish rejections and slow
//! publishes.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use order_pipeline_core::broker::{
    AckMode, Acknowledger, BrokerConnector, BrokerError, BrokerFuture, BrokerSession, Delivery,
    DeliveryStream, OutboundMessage, QueueBinding,
};
use order_pipeline_core::event::OrderEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A message as stored by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    /// Routing key given by the publisher
    pub key: Option<String>,
    /// Message body
    pub payload: Vec<u8>,
    /// Content type given by the publisher
    pub content_type: String,
    /// Whether the message has been delivered before
    pub redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    binding: QueueBinding,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    acked: Vec<StoredMessage>,
    dead: Vec<StoredMessage>,
    published: Vec<StoredMessage>,
}

impl QueueState {
    fn new(binding: QueueBinding) -> Self {
        Self {
            binding,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            acked: Vec::new(),
            dead: Vec::new(),
            published: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, QueueState>>,
    epoch: AtomicU64,
    next_tag: AtomicU64,
    unreachable: AtomicBool,
    connect_failures_remaining: AtomicUsize,
    connect_attempts: AtomicUsize,
    publish_failing: AtomicBool,
    publish_failures_remaining: AtomicUsize,
    publish_delay: Mutex<Option<Duration>>,
    activity: Notify,
}

impl BrokerInner {
    fn take_next(self: &Arc<Self>, queue: &str, mode: AckMode) -> Option<Delivery> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.get_mut(queue)?;
        let message = state.ready.pop_front()?;

        match mode {
            AckMode::Auto => {
                state.acked.push(message.clone());
                Some(Delivery::auto_acked(
                    message.payload,
                    Some(message.content_type),
                    message.redelivered,
                ))
            },
            AckMode::Manual => {
                let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
                state.unacked.insert(tag, message.clone());
                let acker = InMemoryAcker {
                    broker: Arc::clone(self),
                    queue: queue.to_string(),
                    tag,
                };
                Some(Delivery::with_acker(
                    message.payload,
                    Some(message.content_type),
                    message.redelivered,
                    Box::new(acker),
                ))
            },
        }
    }

    fn settle(&self, queue: &str, tag: u64, outcome: Settlement) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::AckFailed(format!("queue '{queue}' is gone")))?;
        let mut message = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::AckFailed(format!("unknown delivery tag {tag}")))?;

        match outcome {
            Settlement::Ack => state.acked.push(message),
            Settlement::Requeue => {
                message.redelivered = true;
                state.ready.push_front(message);
                self.activity.notify_waiters();
            },
            Settlement::Discard => state.dead.push(message),
        }
        Ok(())
    }
}

enum Settlement {
    Ack,
    Requeue,
    Discard,
}

struct InMemoryAcker {
    broker: Arc<BrokerInner>,
    queue: String,
    tag: u64,
}

impl Acknowledger for InMemoryAcker {
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()> {
        Box::pin(async move { self.broker.settle(&self.queue, self.tag, Settlement::Ack) })
    }

    fn nack(self: Box<Self>, requeue: bool) -> BrokerFuture<'static, ()> {
        let outcome = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Discard
        };
        Box::pin(async move { self.broker.settle(&self.queue, self.tag, outcome) })
    }
}

/// In-memory broker. Cloning shares the same broker.
///
/// # Example
///
/// ```
/// use order_pipeline_testing::InMemoryBroker;
/// use order_pipeline_core::broker::{BrokerConnector, OutboundMessage, QueueBinding};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let session = broker.connect().await?;
/// let binding = QueueBinding::order_events();
///
/// session.declare(&binding).await?;
/// session.publish(&binding, OutboundMessage::new(b"{}".to_vec(), "application/json")).await?;
///
/// assert_eq!(broker.published("order_events").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Creates an empty, reachable broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-creates a queue, as if another participant declared it first.
    pub fn predeclare(&self, binding: QueueBinding) {
        self.inner
            .queues
            .lock()
            .unwrap()
            .insert(binding.name.clone(), QueueState::new(binding));
    }

    /// Refuse every connection while `unreachable` is true.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner
            .connect_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Reject every publish while `failing` is true.
    pub fn set_publish_failing(&self, failing: bool) {
        self.inner.publish_failing.store(failing, Ordering::SeqCst);
    }

    /// Reject the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner
            .publish_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Hold every publish started from now on for `delay` before it is
    /// processed. A publish already waiting keeps its delay.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.inner.publish_delay.lock().unwrap() = delay;
    }

    /// Close every open session. Unacked messages go back to their queues.
    pub fn drop_connections(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut queues = self.inner.queues.lock().unwrap();
            for state in queues.values_mut() {
                let mut tags: Vec<u64> = state.unacked.keys().copied().collect();
                tags.sort_unstable();
                for tag in tags.into_iter().rev() {
                    if let Some(mut message) = state.unacked.remove(&tag) {
                        message.redelivered = true;
                        state.ready.push_front(message);
                    }
                }
            }
        }
        self.inner.activity.notify_waiters();
    }

    /// Puts a raw message on a declared queue, bypassing the publish path.
    pub fn inject(&self, queue: &str, payload: &[u8]) {
        let mut queues = self.inner.queues.lock().unwrap();
        if let Some(state) = queues.get_mut(queue) {
            state.ready.push_back(StoredMessage {
                key: None,
                payload: payload.to_vec(),
                content_type: "application/octet-stream".to_string(),
                redelivered: false,
            });
        }
        drop(queues);
        self.inner.activity.notify_waiters();
    }

    /// Binding a queue was declared with.
    #[must_use]
    pub fn binding(&self, queue: &str) -> Option<QueueBinding> {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|state| state.binding.clone())
    }

    /// Every message ever accepted by `publish` on `queue`.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<StoredMessage> {
        self.read_queue(queue, |state| state.published.clone())
    }

    /// Published messages on `queue` decoded as order events.
    #[must_use]
    pub fn published_events(&self, queue: &str) -> Vec<OrderEvent> {
        self.published(queue)
            .iter()
            .filter_map(|message| OrderEvent::from_json(&message.payload).ok())
            .collect()
    }

    /// Messages waiting for delivery.
    #[must_use]
    pub fn ready_len(&self, queue: &str) -> usize {
        self.read_queue(queue, |state| state.ready.len())
    }

    /// Messages delivered but not yet settled.
    #[must_use]
    pub fn unacked_len(&self, queue: &str) -> usize {
        self.read_queue(queue, |state| state.unacked.len())
    }

    /// Messages acknowledged (or auto-acknowledged on delivery).
    #[must_use]
    pub fn acked(&self, queue: &str) -> Vec<StoredMessage> {
        self.read_queue(queue, |state| state.acked.clone())
    }

    /// Messages rejected without requeue.
    #[must_use]
    pub fn discarded(&self, queue: &str) -> Vec<StoredMessage> {
        self.read_queue(queue, |state| state.dead.clone())
    }

    fn read_queue<T: Default>(&self, queue: &str, read: impl FnOnce(&QueueState) -> T) -> T {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(read)
            .unwrap_or_default()
    }
}

impl BrokerConnector for InMemoryBroker {
    fn connect(&self) -> BrokerFuture<'_, Arc<dyn BrokerSession>> {
        Box::pin(async move {
            self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

            if self.inner.unreachable.load(Ordering::SeqCst) {
                return Err(BrokerError::ConnectionFailed(
                    "connection refused".to_string(),
                ));
            }
            let refused = self
                .inner
                .connect_failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(BrokerError::ConnectionFailed(
                    "connection refused".to_string(),
                ));
            }

            let session = InMemorySession {
                broker: Arc::clone(&self.inner),
                epoch: self.inner.epoch.load(Ordering::SeqCst),
            };
            Ok(Arc::new(session) as Arc<dyn BrokerSession>)
        })
    }
}

struct InMemorySession {
    broker: Arc<BrokerInner>,
    epoch: u64,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed("connection dropped".to_string()))
        }
    }
}

impl BrokerSession for InMemorySession {
    fn declare<'a>(&'a self, binding: &'a QueueBinding) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut queues = self.broker.queues.lock().unwrap();
            match queues.get(&binding.name) {
                Some(existing) => binding.check_compatible(&existing.binding),
                None => {
                    queues.insert(binding.name.clone(), QueueState::new(binding.clone()));
                    Ok(())
                },
            }
        })
    }

    fn publish<'a>(
        &'a self,
        binding: &'a QueueBinding,
        message: OutboundMessage,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let delay = *self.broker.publish_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.ensure_open()?;

            let injected = self.broker.publish_failing.load(Ordering::SeqCst)
                || self
                    .broker
                    .publish_failures_remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if injected {
                return Err(BrokerError::PublishFailed {
                    queue: binding.name.clone(),
                    reason: "injected publish failure".to_string(),
                });
            }

            let mut queues = self.broker.queues.lock().unwrap();
            let state =
                queues
                    .get_mut(&binding.name)
                    .ok_or_else(|| BrokerError::PublishFailed {
                        queue: binding.name.clone(),
                        reason: "queue not declared".to_string(),
                    })?;

            let stored = StoredMessage {
                key: message.key,
                payload: message.payload,
                content_type: message.content_type,
                redelivered: false,
            };
            state.published.push(stored.clone());
            state.ready.push_back(stored);
            drop(queues);

            self.broker.activity.notify_waiters();
            Ok(())
        })
    }

    fn consume<'a>(
        &'a self,
        binding: &'a QueueBinding,
        mode: AckMode,
    ) -> BrokerFuture<'a, DeliveryStream> {
        Box::pin(async move {
            self.ensure_open()?;
            if !self.broker.queues.lock().unwrap().contains_key(&binding.name) {
                return Err(BrokerError::ConsumeFailed {
                    queue: binding.name.clone(),
                    reason: "queue not declared".to_string(),
                });
            }

            let broker = Arc::clone(&self.broker);
            let queue = binding.name.clone();
            let epoch = self.epoch;

            let stream = async_stream::stream! {
                loop {
                    let activity = broker.activity.notified();
                    if broker.epoch.load(Ordering::SeqCst) != epoch {
                        yield Err(BrokerError::ChannelClosed("connection dropped".to_string()));
                        break;
                    }
                    if let Some(delivery) = broker.take_next(&queue, mode) {
                        yield Ok(delivery);
                        continue;
                    }
                    activity.await;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn is_open(&self) -> bool {
        self.broker.epoch.load(Ordering::SeqCst) == self.epoch
    }
}
