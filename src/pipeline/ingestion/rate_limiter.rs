use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub requests_per_min: Option<u64>,
    /// Budget for an arbitrary per-request cost (payload bytes, estimated prompt tokens)
    pub units_per_min: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // (tokens left, last refill)
    rpm_tokens: Mutex<(f64, Instant)>,
    units_tokens: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let now = Instant::now();
        let rpm_capacity = limits.requests_per_min.unwrap_or(0) as f64;
        let units_capacity = limits.units_per_min.unwrap_or(0) as f64;
        Self {
            inner: Arc::new(Inner {
                limits,
                rpm_tokens: Mutex::new((rpm_capacity, now)),
                units_tokens: Mutex::new((units_capacity, now)),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Limits::default())
    }

    /// Wait until one request costing `cost` units fits in both budgets.
    pub async fn acquire(&self, cost: u64) {
        if let Some(rpm) = self.inner.limits.requests_per_min.filter(|r| *r > 0) {
            consume_tokens(&self.inner.rpm_tokens, rpm as f64, 60.0, 1.0).await;
        }
        if let Some(upm) = self.inner.limits.units_per_min.filter(|u| *u > 0) {
            // A single request larger than the whole budget waits for a full bucket
            let cost = (cost as f64).min(upm as f64);
            consume_tokens(&self.inner.units_tokens, upm as f64, 60.0, cost).await;
        }
    }
}

async fn consume_tokens(bucket: &Mutex<(f64, Instant)>, capacity: f64, period_secs: f64, cost: f64) {
    loop {
        let mut guard = bucket.lock().await;
        let (ref mut tokens, ref mut last) = *guard;
        let now = Instant::now();
        let elapsed = now.duration_since(*last).as_secs_f64();
        let refill_rate = capacity / period_secs;
        *tokens = (*tokens + elapsed * refill_rate).min(capacity);
        *last = now;
        if *tokens >= cost {
            *tokens -= cost;
            break;
        }
        let need = cost - *tokens;
        let secs = need / refill_rate;
        drop(guard);
        tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
    }
}

#[async_trait::async_trait]
impl crate::app::ports::RateLimiterPort for RateLimiter {
    async fn acquire(&self, cost: u64) {
        RateLimiter::acquire(self, cost).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(1_000_000).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_once_the_bucket_is_empty() {
        let limiter = RateLimiter::new(Limits { requests_per_min: Some(2), units_per_min: None });
        limiter.acquire(0).await;
        limiter.acquire(0).await;

        let start = tokio::time::Instant::now();
        limiter.acquire(0).await;
        // one token refills every 30 seconds at 2 rpm
        assert!(start.elapsed() >= Duration::from_secs(29));
    }
}
