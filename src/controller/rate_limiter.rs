//! Requeue rate limiting.
//!
//! Two limiters combined by taking the larger delay:
//! - a global token bucket (`burst` capacity, `frequency` tokens/second)
//!   that smooths overall requeue throughput,
//! - a per-key exponential backoff, `min(base * 2^failures, max)`, reset
//!   by `forget` once a key reconciles cleanly.
//!
//! Owned by the work queue and called via `&mut self`; the queue lock
//! serializes access.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::RateLimiterConfig;

/// Decides how long a key waits before it is queued again.
pub trait RateLimiter<K>: Send + Debug {
    /// Delay for the next requeue of `item`. Records the attempt.
    fn when(&mut self, item: &K, now: Instant) -> Duration;

    /// Stop tracking `item` (it succeeded).
    fn forget(&mut self, item: &K);

    /// Rate-limited requeues since the last `forget`.
    fn num_requeues(&self, item: &K) -> u32;

    /// Delay for a requeue that is not a failure. Only throughput limits
    /// apply; per-key history is neither read nor recorded.
    fn pace(&mut self, _now: Instant) -> Duration {
        Duration::ZERO
    }
}

/// Per-key exponential failure backoff.
#[derive(Debug)]
pub struct ItemExponentialFailureRateLimiter<K> {
    failures: HashMap<K, u32>,
    base_delay: Duration,
    max_delay: Duration,
}

impl<K: Eq + Hash + Clone> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            failures: HashMap::new(),
            base_delay,
            max_delay,
        }
    }

    fn delay_for(&self, exponent: u32) -> Duration {
        // 2^63 ns already overflows Duration math; clamp early.
        let factor = 2f64.powi(exponent.min(63) as i32);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }
}

impl<K> RateLimiter<K> for ItemExponentialFailureRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Debug,
{
    fn when(&mut self, item: &K, _now: Instant) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);
        self.delay_for(exponent)
    }

    fn forget(&mut self, item: &K) {
        self.failures.remove(item);
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

/// Global token bucket. Reservations always succeed; when the bucket is
/// empty the token count goes negative and the caller waits it out.
#[derive(Debug)]
pub struct BucketRateLimiter {
    burst: f64,
    rate: f64,
    tokens: f64,
    last: Option<Instant>,
}

impl BucketRateLimiter {
    /// `frequency` is clamped to at least one token per second.
    pub fn new(frequency: u32, burst: u32) -> Self {
        Self {
            burst: f64::from(burst),
            rate: f64::from(frequency.max(1)),
            tokens: f64::from(burst),
            last: None,
        }
    }

    fn reserve(&mut self, now: Instant) -> Duration {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        }
        self.last = Some(now);

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(-self.tokens / self.rate)
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&mut self, _item: &K, now: Instant) -> Duration {
        self.reserve(now)
    }

    fn forget(&mut self, _item: &K) {}

    fn num_requeues(&self, _item: &K) -> u32 {
        0
    }

    fn pace(&mut self, now: Instant) -> Duration {
        self.reserve(now)
    }
}

/// Worst case of several limiters.
#[derive(Debug)]
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K: Debug> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&mut self, item: &K, now: Instant) -> Duration {
        self.limiters
            .iter_mut()
            .map(|l| l.when(item, now))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&mut self, item: &K) {
        for limiter in &mut self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(item))
            .max()
            .unwrap_or(0)
    }

    fn pace(&mut self, now: Instant) -> Duration {
        self.limiters
            .iter_mut()
            .map(|l| l.pace(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// The default queue limiter: exponential backoff combined with the bucket.
pub fn default_rate_limiter<K>(config: &RateLimiterConfig) -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + Debug + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay,
            config.failure_max_delay,
        )),
        Box::new(BucketRateLimiter::new(config.frequency, config.burst)),
    ])
}
