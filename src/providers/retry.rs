//! Retry policy driven by the provider error class

use crate::providers::types::{ProviderError, ProviderResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base wait after a rate-limit response
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(61);
const DEFAULT_TRANSIENT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub rate_limit_delay: Duration,
    pub transient_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            transient_delay: DEFAULT_TRANSIENT_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Same retry count, zero waits
    pub fn no_delay(max_retries: u32) -> Self {
        Self {
            max_retries,
            rate_limit_delay: Duration::ZERO,
            transient_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (0-based).
    /// Rate limits back off exponentially from the base delay without jitter,
    /// or honour the provider's Retry-After. Transient errors get full jitter.
    pub fn delay_for(&self, err: &ProviderError, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        match err {
            ProviderError::RateLimited { retry_after, .. } => retry_after
                .unwrap_or_else(|| self.rate_limit_delay.saturating_mul(factor))
                .min(self.max_delay),
            ProviderError::Transient(_) => {
                let ceiling = self.transient_delay.saturating_mul(factor).min(self.max_delay);
                if ceiling.is_zero() {
                    return ceiling;
                }
                let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
                Duration::from_millis(millis)
            }
            ProviderError::Fatal(_) => Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || retry >= self.max_retries => return Err(err),
                Err(err) => {
                    let wait = self.delay_for(&err, retry);
                    warn!(
                        call = label,
                        attempt = retry + 1,
                        max_attempts = self.max_retries + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Retryable provider error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    retry += 1;
                }
            }
        }
    }
}
