//! # Order Pipeline Runtime
//!
//! The moving parts of the order placement pipeline.
//!
//! ## Core Components
//!
//! - **[`OrderOrchestrator`]**: validate → resolve → record → publish, per request
//! - **[`InMemoryLedger`]**: concurrent append-only order store
//! - **[`EventPublisher`]**: long-lived, self-healing broker session for order events
//! - **[`RepublishQueue`] / [`Republisher`]**: background retry for events whose
//!   publish failed after the order was recorded
//! - **[`NotificationWorker`]**: consumes order events with manual acknowledgment
//! - **[`DeadLetterQueue`]**: deliveries the worker gave up on
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_runtime::{EventPublisher, InMemoryLedger, OrderOrchestrator, RepublishQueue};
//!
//! let publisher = Arc::new(EventPublisher::new(connector, QueueBinding::order_events()));
//! let orchestrator = OrderOrchestrator::new(
//!     catalog,
//!     Arc::new(InMemoryLedger::new()),
//!     publisher,
//!     Arc::new(RepublishQueue::default()),
//!     Arc::new(SystemClock),
//!     Arc::new(TimestampIds::new()),
//! );
//!
//! let outcome = orchestrator.place(&principal, OrderRequest::new("b1")).await?;
//! ```

/// Bounded retry with a fixed pause between attempts
pub mod retry;

/// Environment-variable parsing for the service binaries
pub mod config;

/// Health reporting for readiness probes
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

pub mod dead_letter;
pub mod ledger;
pub mod orchestrator;
pub mod publisher;
pub mod republish;
pub mod worker;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use ledger::InMemoryLedger;
pub use orchestrator::{OrderOrchestrator, PlacementError, PlacementOutcome};
pub use publisher::{EventPublisher, PublishError};
pub use republish::{PendingEvent, RepublishQueue, Republisher};
pub use retry::RetryPolicy;
pub use worker::{LogNotifier, NotificationWorker, WorkerConfig, WorkerError, WorkerState};
