//! External AI capability interfaces
//!
//! The embedding and synthesis models are external services behind traits,
//! so any concrete client (or a test double) can be substituted without
//! touching engine logic. Every call runs under a timeout and a bounded
//! retry budget.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

/// Failure modes of an external provider call
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,

    #[error("timed out")]
    Timeout,

    #[error("provider fault: {0}")]
    Fault(String),
}

/// Maps arbitrary text to a fixed-length vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Maps a prompt plus text fragments to a natural-language summary
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn synthesize(
        &self,
        prompt: &str,
        fragments: &[String],
    ) -> Result<String, ProviderError>;
}

/// Retry policy for provider calls: bounded exponential backoff with a
/// per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_ms: u64, max_ms: u64, call_timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            call_timeout,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    /// Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.base_delay;
        let mut last_err = ProviderError::Fault("no attempts made".into());

        for attempt in 0..self.attempts {
            let result = match timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "provider call failed");
                    last_err = err;
                }
            }

            if attempt + 1 < self.attempts {
                sleep(delay).await;
                delay = delay.saturating_mul(2).min(self.max_delay);
            }
        }

        Err(last_err)
    }
}
