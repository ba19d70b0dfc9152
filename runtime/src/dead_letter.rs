//! Dead-letter queue for deliveries the notification worker gave up on.
//!
//! A delivery lands here when its payload cannot be decoded, or when the
//! notifier kept failing for the same order until the worker's delivery limit.
//! The broker copy is discarded at that point; the entry here is what an
//! operator inspects or replays.
//!
//! The queue is bounded and drops its oldest entry when full.

use crate::metrics::{DEAD_LETTER_DROPPED, DEAD_LETTER_PUSHED, DEAD_LETTER_SIZE};
use chrono::{DateTime, Utc};
use order_pipeline_core::order::OrderId;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One delivery given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Order the delivery was about; `None` for undecodable payloads
    pub order_id: Option<OrderId>,
    /// Raw message body
    pub payload: Vec<u8>,
    /// Last failure
    pub reason: String,
    /// Deliveries seen before giving up
    pub deliveries: usize,
    /// When the worker gave up
    pub failed_at: DateTime<Utc>,
}

/// Bounded FIFO of [`DeadLetter`]s.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    max_size: usize,
}

impl DeadLetterQueue {
    /// Default bound.
    pub const DEFAULT_MAX_SIZE: usize = 1_000;

    /// Create a queue holding at most `max_size` entries (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    /// Add an entry, evicting the oldest when full.
    pub fn push(&self, letter: DeadLetter) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if entries.len() >= self.max_size {
            entries.pop_front();
            metrics::counter!(DEAD_LETTER_DROPPED).increment(1);
            tracing::warn!(max_size = self.max_size, "Dead-letter queue full, dropping oldest entry");
        }

        tracing::warn!(
            order_id = ?letter.order_id.as_ref().map(OrderId::as_str),
            deliveries = letter.deliveries,
            reason = %letter.reason,
            "Delivery moved to the dead-letter queue"
        );
        entries.push_back(letter);

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(DEAD_LETTER_SIZE).set(entries.len() as f64);
        metrics::counter!(DEAD_LETTER_PUSHED).increment(1);
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been dead-lettered (or everything was drained).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Copy of every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = entries.drain(..).collect();
        metrics::gauge!(DEAD_LETTER_SIZE).set(0.0);
        drained
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_SIZE)
    }
}
