//! Order event publisher.
//!
//! Keeps one long-lived broker session. The session is opened and the queue
//! declared lazily on first use; any failure discards it so the next publish
//! starts from a fresh connection.
//!
//! The publisher never retries. Callers that need delivery guarantees put the
//! event on the [`RepublishQueue`](crate::republish::RepublishQueue).

use order_pipeline_core::broker::{
    BrokerConnector, BrokerError, BrokerSession, OutboundMessage, QueueBinding,
};
use order_pipeline_core::event::{CONTENT_TYPE_JSON, OrderEvent};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default bound on one publish, connect and declare included.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishing failed at some step (connect, declare, serialize, send, timeout).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The event did not reach the broker
    #[error("Failed to publish order event: {0}")]
    PublishFailed(String),
}

impl From<BrokerError> for PublishError {
    fn from(error: BrokerError) -> Self {
        Self::PublishFailed(error.to_string())
    }
}

/// Publishes [`OrderEvent`]s to the order events queue.
pub struct EventPublisher {
    connector: Arc<dyn BrokerConnector>,
    binding: QueueBinding,
    timeout: Duration,
    session: Mutex<Option<Arc<dyn BrokerSession>>>,
}

impl EventPublisher {
    /// Creates a publisher for `binding`. No connection is made yet.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>, binding: QueueBinding) -> Self {
        Self {
            connector,
            binding,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
            session: Mutex::new(None),
        }
    }

    /// Sets the per-publish timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The queue this publisher targets.
    #[must_use]
    pub const fn binding(&self) -> &QueueBinding {
        &self.binding
    }

    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::PublishFailed`] if any step fails or the
    /// timeout elapses. The session this publish used is discarded in either
    /// case; a newer session installed by another task is kept.
    pub async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = event
            .to_json()
            .map_err(|e| PublishError::PublishFailed(format!("serialization failed: {e}")))?;
        let message =
            OutboundMessage::new(payload, CONTENT_TYPE_JSON).with_key(event.order_id.as_str());

        let used = OnceLock::new();
        let result = match tokio::time::timeout(self.timeout, self.send(message, &used)).await {
            Ok(result) => result,
            Err(_) => {
                if let Some(session) = used.get() {
                    self.invalidate(session).await;
                }
                Err(PublishError::PublishFailed(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            },
        };

        match &result {
            Ok(()) => {
                tracing::debug!(order_id = %event.order_id, queue = %self.binding.name, "Order event published");
            },
            Err(error) => {
                metrics::counter!(crate::metrics::PUBLISH_FAILED).increment(1);
                tracing::warn!(order_id = %event.order_id, queue = %self.binding.name, %error, "Order event publish failed");
            },
        }
        result
    }

    /// Whether a live session is currently held.
    ///
    /// Returns `false` while another task is connecting.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .is_ok_and(|slot| slot.as_ref().is_some_and(|session| session.is_open()))
    }

    async fn send(
        &self,
        message: OutboundMessage,
        used: &OnceLock<Arc<dyn BrokerSession>>,
    ) -> Result<(), PublishError> {
        let session = self.acquire().await?;
        let _ = used.set(Arc::clone(&session));
        if let Err(error) = session.publish(&self.binding, message).await {
            self.invalidate(&session).await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<Arc<dyn BrokerSession>, PublishError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref().filter(|session| session.is_open()) {
            return Ok(Arc::clone(session));
        }
        *slot = None;

        tracing::info!(queue = %self.binding.name, "Opening publisher session");
        let session = self.connector.connect().await?;
        session.declare(&self.binding).await?;
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn invalidate(&self, failed: &Arc<dyn BrokerSession>) {
        let mut slot = self.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            *slot = None;
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("binding", &self.binding)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
