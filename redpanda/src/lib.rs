//! Redpanda broker backend for the order pipeline.
//!
//! Implements [`BrokerConnector`] and [`BrokerSession`] from
//! `order-pipeline-core` on top of rdkafka, so the publisher and the
//! notification worker can run against Redpanda, Apache Kafka or any other
//! Kafka-compatible cluster.
//!
//! # Queue Mapping
//!
//! A [`QueueBinding`](order_pipeline_core::broker::QueueBinding) maps onto a
//! topic of the same name:
//!
//! - `declare` creates the topic with the binding's arguments as topic configs.
//!   If the topic already exists its configs are compared with the binding and
//!   any difference is a `DeclarationMismatch`.
//! - Topics are always durable, so bindings that ask for non-durable,
//!   exclusive or auto-delete queues are rejected with `UnsupportedBinding`.
//! - Messages are keyed by order id and carry their MIME type in a
//!   `content-type` header.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** in manual mode:
//! - `ack` commits the message's offset + 1
//! - `nack(requeue = true)` seeks the partition back to the message, so it is
//!   fetched again and flagged as redelivered
//! - `nack(requeue = false)` commits past the message, discarding it
//!
//! In auto mode the consumer commits offsets on its own schedule and
//! deliveries need no settlement.
//!
//! # Example
//!
//! ```no_run
//! use order_pipeline_core::broker::{BrokerConnector, QueueBinding};
//! use order_pipeline_redpanda::RedpandaConnector;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = RedpandaConnector::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("notification-service")
//!     .timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let session = connector.connect().await?;
//! session.declare(&QueueBinding::order_events()).await?;
//! # Ok(())
//! # }
//! ```

mod session;

pub use session::RedpandaSession;

use order_pipeline_core::broker::{BrokerConnector, BrokerError, BrokerFuture, BrokerSession};
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the message MIME type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Opens [`RedpandaSession`]s against one cluster.
#[derive(Clone, Debug)]
pub struct RedpandaConnector {
    settings: Arc<Settings>,
}

/// Connection settings shared by every session of a connector.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) brokers: String,
    pub(crate) consumer_group: String,
    pub(crate) timeout: Duration,
    pub(crate) auto_offset_reset: String,
    pub(crate) partitions: i32,
    pub(crate) replication_factor: i32,
}

impl RedpandaConnector {
    /// Connector with default settings for `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the connector.
    #[must_use]
    pub fn builder() -> RedpandaConnectorBuilder {
        RedpandaConnectorBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.settings.brokers
    }

    /// Consumer group used by sessions of this connector.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.settings.consumer_group
    }

    async fn open(&self) -> Result<RedpandaSession, BrokerError> {
        let settings = Arc::clone(&self.settings);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", millis(settings.timeout))
            .set("acks", "all")
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .create()
            .map_err(|e| {
                BrokerError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        // librdkafka connects lazily; a metadata round trip proves a broker answers.
        let probe = producer.clone();
        let timeout = settings.timeout;
        let broker_count = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::ConnectionFailed(format!("Metadata probe aborted: {e}")))?
        .map_err(|e| BrokerError::ConnectionFailed(format!("Cluster unreachable: {e}")))?;

        tracing::info!(
            brokers = %settings.brokers,
            broker_count,
            consumer_group = %settings.consumer_group,
            "Connected to Redpanda"
        );

        Ok(RedpandaSession::new(producer, admin, settings))
    }
}

impl BrokerConnector for RedpandaConnector {
    fn connect(&self) -> BrokerFuture<'_, Arc<dyn BrokerSession>> {
        Box::pin(async move {
            let session = self.open().await?;
            Ok(Arc::new(session) as Arc<dyn BrokerSession>)
        })
    }
}

/// Builder for configuring a [`RedpandaConnector`].
///
/// # Example
///
/// ```no_run
/// use order_pipeline_redpanda::RedpandaConnector;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = RedpandaConnector::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("notification-service")
///     .auto_offset_reset("earliest")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaConnectorBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    partitions: Option<i32>,
    replication_factor: Option<i32>,
}

impl RedpandaConnectorBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group ID.
    ///
    /// Every worker instance sharing a group shares the queue's messages.
    ///
    /// Default: `"order-pipeline"`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Timeout for metadata probes, admin operations and produce calls.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a new consumer group starts reading.
    ///
    /// Default: `"earliest"`, so events published before the first worker
    /// joined are still delivered.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Partition count for topics this connector creates.
    ///
    /// Default: 1
    #[must_use]
    pub const fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Replication factor for topics this connector creates.
    ///
    /// Default: 1
    #[must_use]
    pub const fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }

    /// Build the [`RedpandaConnector`].
    ///
    /// No network traffic happens until [`BrokerConnector::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set.
    pub fn build(self) -> Result<RedpandaConnector, BrokerError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;

        let settings = Settings {
            brokers,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "order-pipeline".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            partitions: self.partitions.unwrap_or(1).max(1),
            replication_factor: self.replication_factor.unwrap_or(1).max(1),
        };

        tracing::debug!(
            brokers = %settings.brokers,
            consumer_group = %settings.consumer_group,
            auto_offset_reset = %settings.auto_offset_reset,
            "RedpandaConnector configured"
        );

        Ok(RedpandaConnector {
            settings: Arc::new(settings),
        })
    }
}

pub(crate) fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}
