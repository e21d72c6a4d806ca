//! Retry with growing backoff for transient SMTP failures
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is transient and a delay remains: log WARN, sleep, retry
//! 4. Otherwise return the error (permanent refusals are never retried)

use crate::transport::is_retryable;
use hj_common::Result;
use std::future::Future;
use std::time::Duration;

/// Delays between attempts; `delays.len()` is the number of retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(10),
                Duration::from_secs(15),
                Duration::from_secs(20),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `operation` until it succeeds, fails permanently, or the delays
    /// are exhausted.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if is_retryable(&err) && attempt <= self.delays.len() => {
                    let delay = self.delays[attempt - 1];
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        delay_s = delay.as_secs(),
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if attempt > 1 {
                        tracing::error!(
                            operation = operation_name,
                            attempt,
                            error = %err,
                            "Giving up after retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
