//! # Order Pipeline Testing
//!
//! Test doubles for the order placement pipeline.
//!
//! This crate provides:
//! - Deterministic environment: [`FixedClock`], [`SequentialIds`]
//! - A scripted catalog: [`StubCatalog`]
//! - An in-process broker with acknowledgment tracking: [`InMemoryBroker`]
//! - A notifier that records what it was asked to send: [`RecordingNotifier`]
//!
//! ## Example
//!
//! ```ignore
//! use order_pipeline_testing::{InMemoryBroker, StubCatalog, test_clock};
//!
//! #[tokio::test]
//! async fn places_an_order() {
//!     let catalog = StubCatalog::new().with_product("b1", "Dune", "Herbert");
//!     let broker = InMemoryBroker::new();
//!     // wire an OrderOrchestrator with these and place an order ...
//!     assert_eq!(broker.published("order_events").len(), 1);
//! }
//! ```

pub mod broker;

use chrono::{DateTime, Utc};
use order_pipeline_core::environment::{Clock, IdGenerator};
use order_pipeline_core::order::OrderId;

/// Mock implementations of environment and collaborator traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)]

    use super::{Clock, DateTime, IdGenerator, OrderId, Utc};
    use order_pipeline_core::catalog::{CatalogClient, CatalogError};
    use order_pipeline_core::event::OrderEvent;
    use order_pipeline_core::notification::{Notifier, NotifyError};
    use order_pipeline_core::order::ProductRecord;
    use std::collections::{HashMap, HashSet};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use order_pipeline_testing::mocks::FixedClock;
    /// use order_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable order ids: `ord_1`, `ord_2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl SequentialIds {
        /// Starts at `ord_1`.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_order_id(&self, _at: DateTime<Utc>) -> OrderId {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            OrderId::new(format!("ord_{n}"))
        }
    }

    /// Catalog answering from a fixed table.
    ///
    /// Unknown ids answer `NotFound { status: 404 }`.
    #[derive(Clone, Debug, Default)]
    pub struct StubCatalog {
        answers: Arc<Mutex<HashMap<String, Result<ProductRecord, CatalogError>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl StubCatalog {
        /// Empty catalog.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a product.
        #[must_use]
        pub fn with_product(self, id: &str, title: &str, author: &str) -> Self {
            let product = ProductRecord {
                id: id.to_string(),
                title: title.to_string(),
                author: author.to_string(),
            };
            self.answers
                .lock()
                .unwrap()
                .insert(id.to_string(), Ok(product));
            self
        }

        /// Makes lookups of `id` fail with `error`.
        #[must_use]
        pub fn with_failure(self, id: &str, error: CatalogError) -> Self {
            self.answers
                .lock()
                .unwrap()
                .insert(id.to_string(), Err(error));
            self
        }

        /// Number of lookups performed so far.
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CatalogClient for StubCatalog {
        fn fetch<'a>(
            &'a self,
            product_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<ProductRecord, CatalogError>> + Send + 'a>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .lock()
                .unwrap()
                .get(product_id)
                .cloned()
                .unwrap_or(Err(CatalogError::NotFound { status: 404 }));
            Box::pin(async move { answer })
        }
    }

    /// Notifier that records events and can be told to fail or stall.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<OrderEvent>>>,
        failures_remaining: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        delay: Arc<Mutex<Option<Duration>>>,
        broken: Arc<Mutex<HashSet<OrderId>>>,
        attempts_by_order: Arc<Mutex<HashMap<OrderId, usize>>>,
    }

    impl RecordingNotifier {
        /// Notifier that always succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` notifications.
        pub fn fail_next(&self, count: usize) {
            self.failures_remaining.store(count, Ordering::SeqCst);
        }

        /// Fail every notification for `order_id`, however often it is retried.
        pub fn always_fail_for(&self, order_id: &str) {
            self.broken
                .lock()
                .unwrap()
                .insert(OrderId::new(order_id.to_string()));
        }

        /// Sleep for `delay` before every notification.
        pub fn stall_for(&self, delay: Option<Duration>) {
            *self.delay.lock().unwrap() = delay;
        }

        /// Notifications started so far, including failed and stalled ones.
        #[must_use]
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Notifications started for one order.
        #[must_use]
        pub fn attempts_for(&self, order_id: &str) -> usize {
            self.attempts_by_order
                .lock()
                .unwrap()
                .get(&OrderId::new(order_id.to_string()))
                .copied()
                .unwrap_or(0)
        }

        /// Events successfully notified, in order.
        #[must_use]
        pub fn sent(&self) -> Vec<OrderEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(
            &'a self,
            event: &'a OrderEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
            Box::pin(async move {
                let delay = *self.delay.lock().unwrap();
                self.attempts.fetch_add(1, Ordering::SeqCst);
                *self
                    .attempts_by_order
                    .lock()
                    .unwrap()
                    .entry(event.order_id.clone())
                    .or_default() += 1;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                let fail = self.broken.lock().unwrap().contains(&event.order_id)
                    || self
                        .failures_remaining
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                if fail {
                    return Err(NotifyError(format!(
                        "injected failure for {}",
                        event.order_id
                    )));
                }

                self.sent.lock().unwrap().push(event.clone());
                Ok(())
            })
        }
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, StoredMessage};
pub use mocks::{FixedClock, RecordingNotifier, SequentialIds, StubCatalog, test_clock};
