//! Kafka-backed broker session

use crate::{CONTENT_TYPE_HEADER, Settings, millis};
use order_pipeline_core::broker::{
    AckMode, Acknowledger, BrokerError, BrokerFuture, BrokerSession, Delivery, DeliveryStream,
    OutboundMessage, QueueBinding,
};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, ResourceSpecifier, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Offsets handed back with `nack(requeue = true)`, so the refetch is flagged
/// as redelivered.
type Requeued = Arc<Mutex<HashSet<(i32, i64)>>>;

/// One producer plus admin client bound to a cluster.
///
/// Consumers are created per [`BrokerSession::consume`] call.
pub struct RedpandaSession {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    settings: Arc<Settings>,
    open: Arc<AtomicBool>,
}

impl RedpandaSession {
    pub(crate) fn new(
        producer: FutureProducer,
        admin: AdminClient<DefaultClientContext>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            producer,
            admin,
            settings,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.settings.timeout))
    }

    async fn declare_topic(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        reject_unsupported(binding)?;

        let mut topic = NewTopic::new(
            &binding.name,
            self.settings.partitions,
            TopicReplication::Fixed(self.settings.replication_factor),
        );
        for (key, value) in &binding.arguments {
            topic = topic.set(key, value);
        }

        let results = self
            .admin
            .create_topics([&topic], &self.admin_options())
            .await
            .map_err(|e| self.transport_failure(&e))?;

        for result in results {
            match result {
                Ok(name) => {
                    tracing::info!(topic = %name, "Created topic");
                },
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    self.verify_existing(binding).await?;
                },
                Err((name, code)) => return Err(creation_refused(name, code)),
            }
        }
        Ok(())
    }

    async fn verify_existing(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        if binding.arguments.is_empty() {
            tracing::debug!(topic = %binding.name, "Topic already exists");
            return Ok(());
        }

        let results = self
            .admin
            .describe_configs([&ResourceSpecifier::Topic(&binding.name)], &self.admin_options())
            .await
            .map_err(|e| self.transport_failure(&e))?;

        for result in results {
            let resource = result.map_err(|code| {
                BrokerError::ConnectionFailed(format!(
                    "cannot describe existing topic '{}': {code}",
                    binding.name
                ))
            })?;

            let differences: Vec<String> = binding
                .arguments
                .iter()
                .filter_map(|(key, wanted)| {
                    let actual = resource.get(key).and_then(|entry| entry.value.as_deref());
                    (actual != Some(wanted.as_str())).then(|| {
                        format!("{key}: wanted {wanted}, found {}", actual.unwrap_or("<unset>"))
                    })
                })
                .collect();

            if !differences.is_empty() {
                return Err(BrokerError::DeclarationMismatch {
                    queue: binding.name.clone(),
                    reason: differences.join("; "),
                });
            }
        }

        tracing::debug!(topic = %binding.name, "Existing topic matches binding");
        Ok(())
    }

    async fn send(
        &self,
        binding: &QueueBinding,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: CONTENT_TYPE_HEADER,
            value: Some(message.content_type.as_str()),
        });
        let mut record = FutureRecord::<str, [u8]>::to(&binding.name)
            .payload(message.payload.as_slice())
            .headers(headers);
        if let Some(key) = &message.key {
            record = record.key(key.as_str());
        }

        match self
            .producer
            .send(record, Timeout::After(self.settings.timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %binding.name,
                    partition,
                    offset,
                    key = message.key.as_deref().unwrap_or(""),
                    "Message published"
                );
                Ok(())
            },
            Err((error, _)) => {
                self.note_fatal(&error);
                tracing::warn!(topic = %binding.name, %error, "Failed to publish message");
                Err(BrokerError::PublishFailed {
                    queue: binding.name.clone(),
                    reason: error.to_string(),
                })
            },
        }
    }

    fn subscribe(&self, binding: &QueueBinding, mode: AckMode) -> Result<DeliveryStream, BrokerError> {
        let auto_commit = matches!(mode, AckMode::Auto);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .set("group.id", &self.settings.consumer_group)
            .set("enable.auto.commit", if auto_commit { "true" } else { "false" })
            .set("auto.offset.reset", &self.settings.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .set("socket.timeout.ms", millis(self.settings.timeout))
            .create()
            .map_err(|e| BrokerError::ConsumeFailed {
                queue: binding.name.clone(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[binding.name.as_str()])
            .map_err(|e| BrokerError::ConsumeFailed {
                queue: binding.name.clone(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

        tracing::info!(
            topic = %binding.name,
            consumer_group = %self.settings.consumer_group,
            ack_mode = %mode,
            "Subscribed to topic"
        );

        let consumer = Arc::new(consumer);
        let requeued: Requeued = Arc::default();
        let open = Arc::clone(&self.open);
        let queue = binding.name.clone();
        let seek_timeout = self.settings.timeout;

        let stream = async_stream::stream! {
            loop {
                if !open.load(Ordering::SeqCst) {
                    break;
                }
                let message = match consumer.recv().await {
                    Ok(message) => message.detach(),
                    Err(error) => {
                        if is_fatal(&error) {
                            open.store(false, Ordering::SeqCst);
                        }
                        yield Err(BrokerError::ConsumeFailed {
                            queue: queue.clone(),
                            reason: error.to_string(),
                        });
                        break;
                    },
                };

                let position = (message.partition(), message.offset());
                let redelivered = requeued
                    .lock()
                    .map(|mut set| set.remove(&position))
                    .unwrap_or(false);
                let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                let content_type = content_type_of(&message);

                tracing::trace!(
                    topic = %queue,
                    partition = position.0,
                    offset = position.1,
                    redelivered,
                    "Received message"
                );

                let delivery = if auto_commit {
                    Delivery::auto_acked(payload, content_type, redelivered)
                } else {
                    Delivery::with_acker(
                        payload,
                        content_type,
                        redelivered,
                        Box::new(OffsetAcker {
                            consumer: Arc::clone(&consumer),
                            requeued: Arc::clone(&requeued),
                            message,
                            seek_timeout,
                        }),
                    )
                };
                yield Ok(delivery);
            }
        };

        Ok(Box::pin(stream))
    }

    fn transport_failure(&self, error: &KafkaError) -> BrokerError {
        self.note_fatal(error);
        BrokerError::ChannelClosed(error.to_string())
    }

    fn note_fatal(&self, error: &KafkaError) {
        if is_fatal(error) {
            self.open.store(false, Ordering::SeqCst);
        }
    }
}

impl BrokerSession for RedpandaSession {
    fn declare<'a>(&'a self, binding: &'a QueueBinding) -> BrokerFuture<'a, ()> {
        Box::pin(self.declare_topic(binding))
    }

    fn publish<'a>(
        &'a self,
        binding: &'a QueueBinding,
        message: OutboundMessage,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(self.send(binding, message))
    }

    fn consume<'a>(
        &'a self,
        binding: &'a QueueBinding,
        mode: AckMode,
    ) -> BrokerFuture<'a, DeliveryStream> {
        Box::pin(async move { self.subscribe(binding, mode) })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Settles one message by committing or seeking its partition offset.
struct OffsetAcker {
    consumer: Arc<StreamConsumer>,
    requeued: Requeued,
    message: OwnedMessage,
    seek_timeout: std::time::Duration,
}

impl OffsetAcker {
    fn commit_past(&self) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                self.message.topic(),
                self.message.partition(),
                Offset::Offset(self.message.offset() + 1),
            )
            .map_err(|e| BrokerError::AckFailed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::AckFailed(e.to_string()))
    }
}

impl Acknowledger for OffsetAcker {
    fn ack(self: Box<Self>) -> BrokerFuture<'static, ()> {
        Box::pin(async move { self.commit_past() })
    }

    fn nack(self: Box<Self>, requeue: bool) -> BrokerFuture<'static, ()> {
        Box::pin(async move {
            if !requeue {
                tracing::debug!(
                    topic = self.message.topic(),
                    offset = self.message.offset(),
                    "Discarding message"
                );
                return self.commit_past();
            }

            let position = (self.message.partition(), self.message.offset());
            if let Ok(mut set) = self.requeued.lock() {
                set.insert(position);
            }
            tokio::task::spawn_blocking(move || {
                self.consumer.seek(
                    self.message.topic(),
                    self.message.partition(),
                    Offset::Offset(self.message.offset()),
                    Timeout::After(self.seek_timeout),
                )
            })
            .await
            .map_err(|e| BrokerError::AckFailed(e.to_string()))?
            .map_err(|e| BrokerError::AckFailed(format!("seek failed: {e}")))
        })
    }
}

fn reject_unsupported(binding: &QueueBinding) -> Result<(), BrokerError> {
    let mut problems = Vec::new();
    if !binding.durable {
        problems.push("topics are always durable");
    }
    if binding.exclusive {
        problems.push("topics cannot be exclusive to one connection");
    }
    if binding.auto_delete {
        problems.push("topics are never deleted automatically");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(BrokerError::UnsupportedBinding {
            queue: binding.name.clone(),
            reason: problems.join("; "),
        })
    }
}

fn content_type_of(message: &OwnedMessage) -> Option<String> {
    message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|header| header.key == CONTENT_TYPE_HEADER)
            .and_then(|header| header.value)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    })
}

fn is_fatal(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::Fatal)
    )
}

/// Only configuration conflicts are declaration mismatches. Every other
/// refusal, such as a broker that is still joining, is a retryable connection
/// failure.
fn creation_refused(topic: String, code: RDKafkaErrorCode) -> BrokerError {
    match code {
        RDKafkaErrorCode::InvalidConfig
        | RDKafkaErrorCode::PolicyViolation
        | RDKafkaErrorCode::InvalidPartitions
        | RDKafkaErrorCode::InvalidTopic
        | RDKafkaErrorCode::TopicAuthorizationFailed => BrokerError::DeclarationMismatch {
            queue: topic,
            reason: format!("topic creation refused: {code}"),
        },
        _ => BrokerError::ConnectionFailed(format!("creating topic '{topic}' failed: {code}")),
    }
}
