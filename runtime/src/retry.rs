//! Bounded retry with a fixed pause between attempts.
//!
//! The notification worker uses this while the broker is still starting: a
//! fixed number of connection attempts, one second apart by default, then a
//! fatal error so a supervisor can restart the process.
//!
//! # Example
//!
//! ```rust
//! use order_pipeline_runtime::retry::{RetryPolicy, retry_while};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::fixed(30, Duration::from_secs(1));
//!
//! let value = retry_while(policy, || async { Ok::<_, String>(42) }, |_| true).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
}

impl RetryPolicy {
    /// `attempts` total tries with a constant `delay` between them.
    ///
    /// `attempts` of zero is treated as one.
    #[must_use]
    pub const fn fixed(attempts: usize, delay: Duration) -> Self {
        let attempts = if attempts == 0 { 1 } else { attempts };
        Self { attempts, delay }
    }

    /// Total number of times an operation may run.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.attempts
    }

    /// Pause after a failed attempt.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(30, Duration::from_secs(1))
    }
}

/// Run `operation` until it succeeds, `is_retryable` rejects its error, or the
/// policy runs out of attempts.
///
/// # Errors
///
/// Returns the first non-retryable error, or the error of the final attempt.
pub async fn retry_while<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Succeeded after retrying");
                }
                return Ok(value);
            },
            Err(error) => error,
        };

        if !is_retryable(&error) {
            tracing::warn!(%error, "Not retryable, giving up");
            return Err(error);
        }
        if attempt >= policy.max_attempts() {
            tracing::error!(attempts = attempt, %error, "Retry budget exhausted");
            return Err(error);
        }

        tracing::warn!(
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = policy.delay().as_millis(),
            %error,
            "Attempt failed, retrying"
        );
        sleep(policy.delay()).await;
        attempt += 1;
    }
}
