//! Bounded retry with exponential backoff.
//!
//! One policy serves both the store's query execution and the coordinator's
//! per-chunk embed+insert work. Only errors classified retryable by
//! [`PipelineError::is_retryable`] consume additional attempts; fatal errors
//! propagate immediately. Nothing is held across a backoff sleep — the
//! operation closure re-acquires whatever it needs on every attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// Attempt ceiling and backoff base for one retried operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base_delay * 2^attempt`, so waits strictly increase.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Run `op` under `policy`, sleeping between retryable failures.
///
/// The final error is the one from the last attempt. `op_name` only labels
/// log events.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut op: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut last_error: Option<PipelineError> = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_after(attempt - 1)).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "retryable failure"
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        PipelineError::Config(format!("{op_name}: retry policy allows zero attempts"))
    }))
}
