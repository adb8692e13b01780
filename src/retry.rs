//! Retry Executor: exponential backoff with cooperative
//! cancellation, usable by the model-download path and elsewhere.
//! A standalone, cancellable helper rather than an inline backoff loop
//! duplicated per call site.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Configuration for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (total attempts =
    /// `max_retries + 1`).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Hard cap on the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Error returned when [`retry`] exhausts its attempts or is cancelled.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before the operation succeeded.
    #[error("retry cancelled")]
    Cancelled,
    /// All attempts were exhausted; wraps the last underlying failure.
    #[error("retries exhausted: {0}")]
    Exhausted(#[source] E),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Run `op` up to `config.max_retries + 1` times with exponential backoff,
/// capped at `config.max_delay`. Between attempts, waits on the lesser of
/// the computed delay and `cancel` firing; if cancelled during the wait,
/// returns [`RetryError::Cancelled`] immediately. On exhaustion, returns
/// [`RetryError::Exhausted`] wrapping the last failure.
pub async fn retry<T, E, F, Fut>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut last_err: Option<E> = None;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        if attempt > 0 {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            }
            let scaled = delay.mul_f64(config.multiplier);
            delay = scaled.min(config.max_delay);
        }

        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }

    Err(RetryError::Exhausted(last_err.expect(
        "loop ran at least once, so last_err is always set on exhaustion",
    )))
}
