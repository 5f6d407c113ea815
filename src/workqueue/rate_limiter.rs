//! Requeue delay policies

use crate::config::RateLimitConfig;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Decides how long a key waits before it is re-added.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the next retry of `key`. Counts as a failure.
    fn when(&self, key: &K) -> Duration;

    /// Clear the failure history of `key`.
    fn forget(&self, key: &K);

    fn num_requeues(&self, key: &K) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> RateLimiter<K> for ItemExponentialFailureRateLimiter<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |backoff| backoff.min(self.max))
    }

    fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

/// Overall token bucket shared by every key.
///
/// A throttled call reserves the next free cell, so keys refused while the
/// bucket is empty are released one replenish interval apart.
pub struct BucketRateLimiter {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
    interval: Duration,
    /// Release time of the latest reserved cell.
    reserved_until: Mutex<Option<Instant>>,
}

impl BucketRateLimiter {
    pub fn new(qps: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(qps).allow_burst(burst);
        Self {
            limiter: DefaultDirectRateLimiter::direct(quota),
            clock: DefaultClock::default(),
            interval: quota.replenish_interval(),
            reserved_until: Mutex::new(None),
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        let mut reserved = self.reserved_until.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let pending = matches!(*reserved, Some(until) if until > now);

        let earliest = match self.limiter.check() {
            Ok(()) if !pending => return Duration::ZERO,
            Ok(()) => now,
            Err(not_until) => now + not_until.wait_time_from(self.clock.now()),
        };
        let slot = match *reserved {
            Some(until) if until + self.interval > earliest => until + self.interval,
            _ => earliest,
        };
        *reserved = Some(slot);
        slot - now
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Longest delay among its children.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K>
where
    K: Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        for l in &self.limiters {
            l.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key exponential backoff combined with an overall token bucket.
pub fn default_controller_rate_limiter<K>(config: &RateLimitConfig) -> MaxOfRateLimiter<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    let qps = NonZeroU32::new(config.qps).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        )),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}
