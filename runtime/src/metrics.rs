//! Prometheus metrics for the order pipeline.
//!
//! Components record through the `metrics` facade unconditionally; nothing is
//! exported unless a binary starts a [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use order_pipeline_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! let text = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Orders recorded and published.
pub const ORDERS_PLACED: &str = "orders.placed";
/// Orders recorded whose event went to the republish queue.
pub const ORDERS_DEGRADED: &str = "orders.degraded";
/// Placements refused before recording (label `reason`).
pub const ORDERS_REJECTED: &str = "orders.rejected";
/// Catalog round-trip latency in seconds.
pub const CATALOG_LOOKUP_DURATION: &str = "catalog.lookup.duration";
/// Publish attempts that failed.
pub const PUBLISH_FAILED: &str = "publisher.publish.failed";
/// Events waiting in the republish queue.
pub const REPUBLISH_BACKLOG: &str = "republish.backlog";
/// Events dropped from a full republish queue or after too many attempts.
pub const REPUBLISH_DROPPED: &str = "republish.dropped";
/// Deliveries settled by the notification worker (label `outcome`).
pub const NOTIFICATIONS_PROCESSED: &str = "notifications.processed";
/// Deliveries skipped as already-processed.
pub const NOTIFICATIONS_DUPLICATES: &str = "notifications.duplicates";
/// Broker connection attempts by the notification worker.
pub const BROKER_CONNECT_ATTEMPTS: &str = "broker.connect.attempts";
/// Deliveries held in the dead-letter queue.
pub const DEAD_LETTER_SIZE: &str = "dlq.size";
/// Deliveries moved to the dead-letter queue.
pub const DEAD_LETTER_PUSHED: &str = "dlq.pushed";
/// Dead letters evicted from a full queue.
pub const DEAD_LETTER_DROPPED: &str = "dlq.dropped";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address it is advertised on.
///
/// The HTTP side is served by the owning binary on its own listener at
/// [`addr`](Self::addr).
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the metrics endpoint is served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A second installation in the same process (e.g. in tests) is logged and
    /// ignored; [`render`](Self::render) then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(CATALOG_LOOKUP_DURATION.to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(ORDERS_PLACED, "Orders recorded and published");
    describe_counter!(
        ORDERS_DEGRADED,
        "Orders recorded whose event publication failed"
    );
    describe_counter!(ORDERS_REJECTED, "Placements refused before recording");
    describe_histogram!(
        CATALOG_LOOKUP_DURATION,
        metrics::Unit::Seconds,
        "Catalog lookup latency"
    );
    describe_counter!(PUBLISH_FAILED, "Failed publish attempts");
    describe_gauge!(REPUBLISH_BACKLOG, "Events waiting to be republished");
    describe_counter!(REPUBLISH_DROPPED, "Events abandoned by the republisher");
    describe_counter!(
        NOTIFICATIONS_PROCESSED,
        "Deliveries settled by the notification worker"
    );
    describe_counter!(
        NOTIFICATIONS_DUPLICATES,
        "Duplicate deliveries acknowledged without notifying"
    );
    describe_counter!(BROKER_CONNECT_ATTEMPTS, "Broker connection attempts");
    describe_gauge!(DEAD_LETTER_SIZE, "Deliveries held in the dead-letter queue");
    describe_counter!(DEAD_LETTER_PUSHED, "Deliveries given up on by the worker");
    describe_counter!(DEAD_LETTER_DROPPED, "Dead letters evicted from a full queue");
}
