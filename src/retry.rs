//! Retry logic with exponential backoff
//!
//! Transient per-track failures (timeouts, dropped connections, server overload)
//! are retried with exponential backoff and optional jitter before the track is
//! reported as failed.
//!
//! # Example
//!
//! ```no_run
//! use downsonic::config::RetryConfig;
//! use downsonic::retry::with_retry;
//! use downsonic::Result;
//!
//! # async fn fetch() -> Result<Vec<u8>> { Ok(Vec::new()) }
//! # async fn example() -> Result<()> {
//! let bytes = with_retry(&RetryConfig::default(), || fetch()).await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Errors that know whether trying again could help
///
/// Transient failures (network timeouts, server busy, connection reset) return `true`.
/// Permanent failures (authentication, disk full, malformed payloads) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_body()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Error::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::Interrupted
            ),
            // Envelopes are deliberate answers from the server
            Error::Api { .. } | Error::Authentication(_) => false,
            Error::InvalidResponse(_) | Error::Serialization(_) => false,
            Error::Config { .. } | Error::Credentials(_) => false,
            Error::DestinationUnwritable { .. } | Error::Cancelled | Error::Other(_) => false,
        }
    }
}

/// Delay schedule for one retried operation
#[derive(Debug)]
struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
    next: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            retries: 0,
            next: config.initial_delay,
        }
    }

    /// Delay before the next retry, or `None` once the retry budget is spent
    fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let base = self.next;
        let grown = base.as_secs_f64() * self.config.backoff_multiplier;
        self.next = Duration::from_secs_f64(grown).min(self.config.max_delay);

        Some(if self.config.jitter {
            add_jitter(base)
        } else {
            base
        })
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// The last error is returned when retries are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    with_retry_notify(config, operation, |error, retry, delay| {
        tracing::warn!(
            error = %error,
            retry,
            max_retries = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
    })
    .await
}

/// Like [`with_retry`], but hands every scheduled retry to `on_retry`
/// (error, retry number starting at 1, delay) instead of logging it.
pub async fn with_retry_notify<F, Fut, T, E, N>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    N: FnMut(&E, u32, Duration),
{
    let mut backoff = Backoff::new(config);

    loop {
        let error = match operation().await {
            Ok(value) => {
                if backoff.retries > 0 {
                    tracing::debug!(retries = backoff.retries, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(error);
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::debug!(error = %error, retries = backoff.retries, "retries exhausted");
            return Err(error);
        };

        on_retry(&error, backoff.retries, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Spread a delay over `[delay, 2 * delay]` so parallel workers do not retry in lockstep
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
