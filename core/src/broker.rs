//! Message broker abstraction for order events.
//!
//! The order service publishes and the notification worker consumes through
//! the traits in this module. Both sides talk to one durable queue and must
//! declare it identically.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  connect   ┌─────────────────┐
//! │ BrokerConnector │──────────► │  BrokerSession  │
//! └─────────────────┘            └────────┬────────┘
//!                                         │
//!                  ┌──────────────────────┼──────────────────────┐
//!                  ▼                      ▼                      ▼
//!             declare(binding)     publish(binding, msg)   consume(binding, ack)
//!                                                                │
//!                                                                ▼
//!                                                          DeliveryStream
//!                                                           │ ack / nack
//! ```
//!
//! # Key Principles
//!
//! - **Identical declarations**: a [`QueueBinding`] that conflicts with the
//!   queue the broker already holds is an error ([`BrokerError::DeclarationMismatch`]),
//!   never a silent divergence.
//! - **Explicit acknowledgment**: in [`AckMode::Manual`] a delivery stays
//!   unacknowledged until the consumer calls [`Delivery::ack`] or
//!   [`Delivery::nack`].
//! - **Sessions can die**: [`BrokerSession::is_open`] lets owners detect a dead
//!   session and reconnect.
//!
//! # Implementations
//!
//! - `InMemoryBroker` (`order-pipeline-testing`) - for tests
//! - `RedpandaConnector` (`order-pipeline-redpanda`) - Kafka-compatible, for production

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Name of the queue carrying `order placed` events.
pub const ORDER_EVENTS_QUEUE: &str = "order_events";

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The session or channel is no longer usable
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The declaration conflicts with the existing queue
    #[error("Declaration of queue '{queue}' conflicts with existing queue: {reason}")]
    DeclarationMismatch {
        /// The queue being declared
        queue: String,
        /// Which properties differ
        reason: String,
    },

    /// The backend cannot represent the requested binding
    #[error("Queue '{queue}' cannot be declared on this broker: {reason}")]
    UnsupportedBinding {
        /// The queue being declared
        queue: String,
        /// Why the binding is unsupported
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The target queue
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start or continue consuming
    #[error("Consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The source queue
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Acknowledging a delivery failed
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),
}

impl BrokerError {
    /// Whether the error means the session should be discarded.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ChannelClosed(_) | Self::ConsumeFailed { .. }
        )
    }
}

/// Future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Declaration of a queue shared by publishers and consumers.
///
/// # Example
///
/// ```
/// use order_pipeline_core::broker::QueueBinding;
///
/// let binding = QueueBinding::order_events();
/// assert_eq!(binding.name, "order_events");
/// assert!(binding.durable);
/// assert!(!binding.exclusive);
/// assert!(!binding.auto_delete);
/// assert!(binding.arguments.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBinding {
    /// Queue name
    pub name: String,
    /// Queue survives broker restarts
    pub durable: bool,
    /// Queue is private to the declaring connection
    pub exclusive: bool,
    /// Queue is removed when its last consumer leaves
    pub auto_delete: bool,
    /// Backend-specific declaration arguments
    pub arguments: BTreeMap<String, String>,
}

impl QueueBinding {
    /// A durable, shared, persistent queue with no arguments.
    #[must_use]
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: BTreeMap::new(),
        }
    }

    /// The binding both order service and notification worker declare.
    #[must_use]
    pub fn order_events() -> Self {
        Self::durable(ORDER_EVENTS_QUEUE)
    }

    /// Adds a declaration argument.
    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Check that re-declaring `self` over `existing` would not diverge.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclarationMismatch`] naming every differing property.
    pub fn check_compatible(&self, existing: &Self) -> Result<(), BrokerError> {
        let mut differences = Vec::new();

        if self.durable != existing.durable {
            differences.push(format!(
                "durable (declared {}, existing {})",
                self.durable, existing.durable
            ));
        }
        if self.exclusive != existing.exclusive {
            differences.push(format!(
                "exclusive (declared {}, existing {})",
                self.exclusive, existing.exclusive
            ));
        }
        if self.auto_delete != existing.auto_delete {
            differences.push(format!(
                "auto_delete (declared {}, existing {})",
                self.auto_delete, existing.auto_delete
            ));
        }
        if self.arguments != existing.arguments {
            differences.push(format!(
                "arguments (declared {:?}, existing {:?})",
                self.arguments, existing.arguments
            ));
        }

        if differences.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::DeclarationMismatch {
                queue: self.name.clone(),
                reason: differences.join(", "),
            })
        }
    }
}

/// A message ready to be published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Routing/partitioning key (the order id for order events)
    pub key: Option<String>,
    /// Serialized body
    pub payload: Vec<u8>,
    /// MIME type of `payload`
    pub content_type: String,
}

impl OutboundMessage {
    /// Unkeyed message with the given body.
    #[must_use]
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            key: None,
            payload,
            content_type: content_type.into(),
        }
    }

    /// Sets the routing key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Acknowledgment policy for a consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Broker considers a message delivered as soon as it is handed out
    /// (at-most-once)
    Auto,
    /// Consumer acknowledges after processing (at-least-once)
    #[default]
    Manual,
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown ack mode '{other}' (expected auto or manual)")),
        }
    }
}

/// Settles one delivery with the broker.
pub trait Acknowledger: Send {
    /// Mark the delivery as processed.
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()>;

    /// Reject the delivery; `requeue` asks the broker to deliver it again.
    fn nack(self: Box<Self>, requeue: bool) -> BrokerFuture<'static, ()>;
}

/// A message received from a queue.
pub struct Delivery {
    /// Message body
    pub payload: Vec<u8>,
    /// MIME type, if the publisher set one
    pub content_type: Option<String>,
    /// Whether the broker delivered this message before
    pub redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// A delivery that needs no settlement (auto-acknowledged).
    #[must_use]
    pub fn auto_acked(payload: Vec<u8>, content_type: Option<String>, redelivered: bool) -> Self {
        Self {
            payload,
            content_type,
            redelivered,
            acker: None,
        }
    }

    /// A delivery that must be settled through `acker`.
    #[must_use]
    pub fn with_acker(
        payload: Vec<u8>,
        content_type: Option<String>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            payload,
            content_type,
            redelivered,
            acker: Some(acker),
        }
    }

    /// Whether this delivery still needs an ack or nack.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the delivery. No-op if already settled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the ack.
    pub async fn ack(&mut self) -> Result<(), BrokerError> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery. No-op if already settled.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the nack.
    pub async fn nack(&mut self, requeue: bool) -> Result<(), BrokerError> {
        match self.acker.take() {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("content_type", &self.content_type)
            .field("redelivered", &self.redelivered)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// An open connection plus channel to the broker.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so sessions can be shared as
/// `Arc<dyn BrokerSession>`.
pub trait BrokerSession: Send + Sync {
    /// Declare `binding` (idempotent).
    ///
    /// # Errors
    ///
    /// - [`BrokerError::DeclarationMismatch`] if the queue exists with other properties
    /// - [`BrokerError::UnsupportedBinding`] if the backend cannot honour the flags
    /// - [`BrokerError::ChannelClosed`] if the session is dead
    fn declare<'a>(&'a self, binding: &'a QueueBinding) -> BrokerFuture<'a, ()>;

    /// Publish one message to the queue named by `binding`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not accept it.
    fn publish<'a>(
        &'a self,
        binding: &'a QueueBinding,
        message: OutboundMessage,
    ) -> BrokerFuture<'a, ()>;

    /// Start consuming the queue named by `binding`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConsumeFailed`] if the consumer cannot be registered.
    fn consume<'a>(
        &'a self,
        binding: &'a QueueBinding,
        mode: AckMode,
    ) -> BrokerFuture<'a, DeliveryStream>;

    /// Whether the session is still usable.
    fn is_open(&self) -> bool;
}

/// Opens broker sessions.
pub trait BrokerConnector: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the broker is unreachable.
    fn connect(&self) -> BrokerFuture<'_, Arc<dyn BrokerSession>>;
}
