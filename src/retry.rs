//! Timeouts and retry with exponential backoff for external calls.
//!
//! Every external call runs under a deadline. Idempotent reads go through
//! [`read`], which retries transient failures:
//! - timeout, HTTP 429, HTTP 5xx, transport error → retry
//! - HTTP 4xx (not 429), malformed response → fail immediately
//! - backoff: base, 2×base, 4×base, ... (exponent capped at 5)
//!
//! Creates and appends go through [`write`], which applies the deadline
//! once and never retries: a timed-out create may still have happened.

use std::future::Future;
use std::time::Duration;

use crate::error::ExternalApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            timeout,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Run an idempotent read, retrying transient failures.
pub async fn read<T, F, Fut>(
    policy: &RetryPolicy,
    service: &'static str,
    mut op: F,
) -> Result<T, ExternalApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalApiError>>,
{
    let mut attempt = 0;
    loop {
        match with_deadline(policy.timeout, service, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying external read"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a side-effecting call once under the deadline.
pub async fn write<T, Fut>(
    policy: &RetryPolicy,
    service: &'static str,
    fut: Fut,
) -> Result<T, ExternalApiError>
where
    Fut: Future<Output = Result<T, ExternalApiError>>,
{
    with_deadline(policy.timeout, service, fut).await
}

async fn with_deadline<T, Fut>(
    timeout: Duration,
    service: &'static str,
    fut: Fut,
) -> Result<T, ExternalApiError>
where
    Fut: Future<Output = Result<T, ExternalApiError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExternalApiError::Timeout { service }),
    }
}
