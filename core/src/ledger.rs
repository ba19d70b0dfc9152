//! Order ledger seam.
//!
//! The ledger is append-only: records go in once and are never changed.
//! Reads return records in insertion order, which is stable within one
//! process run and carries no other meaning.
//!
//! The ledger performs no authorization. Callers decide who may see
//! [`OrderLedger::list_all`].

use crate::order::OrderRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a ledger backend can report.
///
/// The in-memory ledger never fails; durable backends may.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The backing store rejected or lost the write
    #[error("Ledger write failed: {0}")]
    WriteFailed(String),

    /// The backing store could not be read
    #[error("Ledger read failed: {0}")]
    ReadFailed(String),
}

/// Future returned by ledger operations.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Append-only store of placed orders.
///
/// # Concurrency
///
/// Implementations must allow concurrent appends and reads. Each append is
/// atomic: a reader sees a record completely or not at all, and no append is
/// lost.
pub trait OrderLedger: Send + Sync {
    /// Append a record.
    ///
    /// Duplicate ids are a caller bug, not a runtime error.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WriteFailed`] if a durable backend cannot commit.
    fn append(&self, record: OrderRecord) -> LedgerFuture<'_, ()>;

    /// All records owned by `owner`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ReadFailed`] if the backend cannot be read.
    fn list_by_owner<'a>(&'a self, owner: &'a str) -> LedgerFuture<'a, Vec<OrderRecord>>;

    /// Every record, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ReadFailed`] if the backend cannot be read.
    fn list_all(&self) -> LedgerFuture<'_, Vec<OrderRecord>>;

    /// Number of records.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ReadFailed`] if the backend cannot be read.
    fn count(&self) -> LedgerFuture<'_, usize>;
}
