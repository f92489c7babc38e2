//! Retry logic with exponential backoff for target store requests.
//!
//! Only the InfluxDB side is retried: watermark queries and batch writes.
//! Source errors are never retried because a broken cursor cannot resume.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries, also caps server-requested waits.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to the computed delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff with the given number of retries.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Calculates the delay for a given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Up to 25% extra
            let jitter = capped_delay * 0.25 * rand_jitter();
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Delay before retrying after `error`.
    ///
    /// A rate limit answer waits at least the server's `Retry-After`, still
    /// bounded by `max_delay`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            Error::RateLimit(secs) => backoff.max(Duration::from_secs(*secs).min(self.max_delay)),
            _ => backoff,
        }
    }
}

fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Determines if an error is worth another attempt.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RateLimit(_) | Error::Io(_) => true,
        Error::TargetConnection(msg) | Error::Write(msg) | Error::Query(msg) => {
            is_transient_message(msg)
        }
        Error::Config(_)
        | Error::Authentication(_)
        | Error::SourceConnection(_)
        | Error::Extraction(_)
        | Error::PartialWrite(_)
        | Error::Yaml(_)
        | Error::Sql(_) => false,
    }
}

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();

    let is_transport = msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("request failed")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("unreachable");

    let is_server_error = ["500", "502", "503", "504"]
        .iter()
        .any(|code| msg.contains(&format!("error {code}")) || msg.contains(&format!("({code})")))
        || msg.contains("service unavailable")
        || msg.contains("bad gateway");

    is_transport || is_server_error
}

/// Executes an async operation with retry logic.
///
/// # Returns
///
/// The result of the operation, or the last error if all retries failed.
#[allow(clippy::cognitive_complexity)] // Reason: Retry logic with backoff requires tracking multiple states
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_after(attempt, &e);
                warn!(
                    "{}: Retryable error (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, max_attempts, delay, e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
