//! Transport-level retry with exponential backoff and jitter.
//!
//! Only transient HTTP failures (429, 5xx, connection errors) are retried.
//! This sits below the node layer: a base [`Node`](crate::node::Node) still
//! performs no retries of its own. Off by default.

use std::future::Future;
use std::time::Duration;

use crate::error::{NodeError, Result};

/// Configuration for transport retry.
///
/// ```
/// use llm_nodes::provider::BackoffConfig;
///
/// assert_eq!(BackoffConfig::none().max_retries, 0);
/// assert_eq!(BackoffConfig::standard().max_retries, 3);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Delay grows as `initial_delay * multiplier^attempt`.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Randomize each delay in `[0, delay]`.
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>,
    /// Wait for the provider's `Retry-After` hint when one is sent.
    pub respect_retry_after: bool,
}

impl BackoffConfig {
    /// No transport retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// 3 retries, 1s initial, 2x multiplier, 60s cap, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let delay = if self.jitter {
            fastrand::f64() * capped
        } else {
            capped
        };
        Duration::from_secs_f64(delay)
    }

    pub fn is_retryable(&self, error: &NodeError) -> bool {
        match error {
            NodeError::HttpError { status, .. } => self.retryable_statuses.contains(status),
            NodeError::Request(_) => true,
            _ => false,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub async fn with_backoff<T, F, Fut>(config: &BackoffConfig, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && config.is_retryable(&err) => {
                let delay = match &err {
                    NodeError::HttpError {
                        retry_after: Some(hint),
                        ..
                    } if config.respect_retry_after => *hint,
                    _ => config.delay_for_attempt(attempt),
                };
                attempt += 1;
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Parse a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
