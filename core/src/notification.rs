//! Notification side-effect seam used by the notification worker.

use crate::event::OrderEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure of a notification side effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Performs the downstream effect for one order event.
///
/// Deliveries are at-least-once, so implementations may see the same
/// `order_id` more than once.
pub trait Notifier: Send + Sync {
    /// Dispatch the notification for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the notification could not be sent; the
    /// delivery is then requeued.
    fn notify<'a>(
        &'a self,
        event: &'a OrderEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;
}
