//! Process-wide token bucket shared by every worker calling one provider

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Search and comparable-formatting calls per minute
pub const SEARCH_REQUESTS_PER_MINUTE: u32 = 15;
/// Insight and counterfactual calls per minute
pub const ANALYSIS_REQUESTS_PER_MINUTE: u32 = 8;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter. Capacity equals the per-minute quota, so a cold
/// limiter admits a burst of that size before spacing calls out.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn per_minute(name: impl Into<String>, requests: u32) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: capacity / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a token if one is available, otherwise report how long until one is
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Wait until a token is available
    pub async fn acquire(&self) {
        loop {
            match self.take() {
                Ok(()) => return,
                Err(wait) => {
                    debug!(limiter = %self.name, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
