//! Token-bucket rate limiter (§4.3).
//!
//! Grounded in `iteration349_task_queue.py::_check_rate_limit`: a bucket of
//! `burst` capacity refills at `rate_per_second` tokens/sec, refilled lazily
//! on each check against wall-clock elapsed time rather than via a
//! background tick.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub rate_per_second: f64,
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 50.0,
            burst: 100.0,
        }
    }
}

impl RateLimitConfig {
    pub fn with_rate_per_second(mut self, rate: f64) -> Self {
        self.rate_per_second = rate;
        self
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst;
        self
    }
}

struct BucketState {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// A single token bucket keyed to one route or queue.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
    rejected: AtomicI64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.burst,
                last_refill: Utc::now(),
            }),
            config,
            rejected: AtomicI64::new(0),
        }
    }

    /// Attempt to take one token at `now`. Returns `true` if admitted.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let elapsed = (now - state.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        state.tokens = (state.tokens + elapsed * self.config.rate_per_second).min(self.config.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    pub fn rejected_count(&self) -> i64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn admits_up_to_burst_then_rejects() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate_per_second: 1.0,
            burst: 3.0,
        });
        let now = Utc::now();
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));
        assert_eq!(limiter.rejected_count(), 1);
    }

    #[test]
    fn refills_over_elapsed_time() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rate_per_second: 2.0,
            burst: 1.0,
        });
        let now = Utc::now();
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now + Duration::milliseconds(600)));
    }
}
