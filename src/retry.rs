//! Retry logic with exponential backoff
//!
//! Chunk transport calls and the upload completion call are retried here.
//! The policy counts *total* calls: `max_attempts = 3` means one first try plus
//! at most two retries. Delays grow exponentially with optional jitter to keep
//! concurrent chunk workers from retrying in lockstep.
//!
//! # Example
//!
//! ```no_run
//! use cloud_transfer::retry::{IsRetryable, with_retry};
//! use cloud_transfer::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, |_, _| {}, |_attempt| async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx responses) return `true`.
/// Permanent failures (bad input, 4xx rejections, cancellation) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Backend rejections: server-side and throttling codes are transient
            Error::Transport { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 408 || *code == 429,
            },
            Error::Timeout(_) => true,
            // Resending a token the provider cannot replace is pointless
            Error::Unauthorized { refreshable, .. } => *refreshable,
            Error::LengthMismatch { .. } => true,
            Error::Config { .. }
            | Error::InvalidSize { .. }
            | Error::SessionInit(_)
            | Error::ChunkTransport { .. }
            | Error::Completion(_)
            | Error::RangeNotHonored { .. }
            | Error::Cancelled
            | Error::Serialization(_)
            | Error::InvalidUrl(_)
            | Error::NotFound(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `on_retry` - Called with the retry number (1 for the first retry) and the
///   error that caused it, before the backoff delay
/// * `operation` - Async closure receiving the 1-based attempt number
///
/// # Returns
///
/// Returns the successful result, or the last error once the error is not
/// retryable or `config.max_attempts` calls have been made.
pub async fn with_retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    mut on_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    R: FnMut(u32, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                on_retry(attempt, &e);

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(wait).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
                    .min(config.max_delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay; the result lies in `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
