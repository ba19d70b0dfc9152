//! Injected dependencies for time and identifiers.
//!
//! Components take these as trait objects so tests can pin time and produce
//! predictable order ids.

use crate::order::OrderId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - fixed time for deterministic tests
/// let clock = FixedClock::new(Utc::now());
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of order identifiers.
///
/// Implementations must never hand out the same id twice within one process.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh order id for an order placed at `at`.
    fn next_order_id(&self, at: DateTime<Utc>) -> OrderId;
}

/// Timestamp-derived ids with a monotonic disambiguator.
///
/// Produces `ord_<unix-seconds>_<sequence>`. The sequence is process-wide and
/// strictly increasing, so two placements in the same second still differ.
#[derive(Debug, Default)]
pub struct TimestampIds {
    sequence: AtomicU64,
}

impl TimestampIds {
    /// Creates a generator starting at sequence 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for TimestampIds {
    fn next_order_id(&self, at: DateTime<Utc>) -> OrderId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        OrderId::new(format!("ord_{}_{sequence}", at.timestamp()))
    }
}
