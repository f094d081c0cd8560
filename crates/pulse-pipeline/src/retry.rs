use crate::error::PipelineError;
use pulse_config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed-delay retry applied to every task that touches a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(
            cfg.retries,
            Duration::from_secs_f64(cfg.retry_delay_seconds.max(0.0)),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Runs `op` until it succeeds or the policy is exhausted. Each attempt calls
/// `op` afresh, so only this task is re-executed.
pub async fn run_with_retries<T, F, Fut>(
    task: &'static str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(task, attempt, "task succeeded after retry");
                }
                return Ok(value);
            }
            Err(exc) if attempt < max_attempts => {
                warn!(
                    task,
                    attempt,
                    max_attempts,
                    "task failed; retrying in {} s: {exc:#}",
                    policy.delay.as_secs_f64()
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(exc) => {
                return Err(PipelineError::Task {
                    task,
                    attempts: attempt,
                    source: exc,
                });
            }
        }
    }
}
