//! Per-item retry wrapper.
//!
//! Retries any retryable failure in place with a fixed pause, up to a fixed
//! number of attempts, then escalates with [`EvalError::RetryExhausted`].
//! Configuration errors are returned on first sight.

use crate::models::{EvalError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per unit of work
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `f` until it succeeds or the budget is spent.
    pub async fn run<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt = attempt, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(EvalError::RetryExhausted {
                            attempts: attempt,
                            last_error: Box::new(e),
                        });
                    }

                    warn!(
                        attempt = attempt,
                        max = self.max_attempts,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
