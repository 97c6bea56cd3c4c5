//! @ai:module:intent Client-side request pacing for provider calls
//! @ai:module:layer infrastructure
//! @ai:module:public_api RateLimiter, RateLimiterTrait
//! @ai:module:stateless false

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// @ai:intent Trait for pacing outbound provider requests
pub trait RateLimiterTrait: Send + Sync {
    /// @ai:intent Resolve once one more request may be sent
    fn wait(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Per-minute request budget refilled continuously
#[derive(Debug)]
struct Bucket {
    capacity: f64,
    per_second: f64,
    available: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn new(requests_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(requests_per_minute);
        Self {
            capacity,
            per_second: capacity / 60.0,
            available: capacity,
            refilled_at: now,
        }
    }

    /// Take one slot, or report how long until one frees up
    fn acquire(&mut self, now: Instant) -> Option<Duration> {
        let gained = now.saturating_duration_since(self.refilled_at).as_secs_f64() * self.per_second;
        self.available = (self.available + gained).min(self.capacity);
        self.refilled_at = now;

        if self.available >= 1.0 {
            self.available -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.available) / self.per_second))
        }
    }
}

/// @ai:intent Token-bucket pacing; a zero rate disables it
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    /// @ai:intent Limiter allowing `requests_per_minute`, with a full initial burst
    /// @ai:pre requests_per_minute == 0 means unlimited
    /// @ai:effects pure
    pub fn new(requests_per_minute: u32) -> Self {
        if requests_per_minute == 0 {
            return Self::unlimited();
        }
        Self {
            bucket: Some(Mutex::new(Bucket::new(requests_per_minute, Instant::now()))),
        }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }
}

impl RateLimiterTrait for RateLimiter {
    /// @ai:effects state:write, time
    async fn wait(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        loop {
            let delay = bucket.lock().await.acquire(Instant::now());
            match delay {
                None => return,
                Some(delay) => {
                    debug!("Provider rate limit reached, pausing {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_reports_time_to_next_slot() {
        let start = Instant::now();
        let mut bucket = Bucket::new(60, start);

        for _ in 0..60 {
            assert_eq!(bucket.acquire(start), None);
        }
        assert_eq!(bucket.acquire(start), Some(Duration::from_secs(1)));
        assert_eq!(bucket.acquire(start + Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_budget_is_immediate() {
        let limiter = RateLimiter::new(120);

        let start = Instant::now();
        for _ in 0..120 {
            limiter.wait().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_request_waits_for_refill() {
        let limiter = RateLimiter::new(60);
        for _ in 0..60 {
            limiter.wait().await;
        }

        let start = Instant::now();
        limiter.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_never_waits() {
        let limiter = RateLimiter::new(0);

        let start = Instant::now();
        for _ in 0..1000 {
            limiter.wait().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
