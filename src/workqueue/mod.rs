//! Work queue
//!
//! A deduplicating FIFO of work keys with per-key retry delays. A key is
//! held at most once as pending and at most once as in-flight: re-adding
//! a key that is being processed marks it dirty, and [`WorkQueue::done`]
//! puts it back on the queue, so no notification is lost.

pub mod rate_limiter;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

/// Rate-limited, deduplicating work queue.
pub struct WorkQueue<K> {
    name: String,
    state: Mutex<State<K>>,
    /// Signalled when a key becomes available or the queue shuts down.
    ready: Notify,
    /// Signalled when the last in-flight key is marked done.
    idle: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
    /// Cancels pending delayed adds on shutdown.
    timers: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            ready: Notify::new(),
            idle: Notify::new(),
            rate_limiter,
            timers: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `key` as needing processing.
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Requeued by done().
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`. A key re-added meanwhile is queued again.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        let idle = state.processing.is_empty();
        let requeued = state.dirty.contains(key);
        if requeued {
            state.queue.push_back(key.clone());
        }
        drop(state);

        if requeued {
            self.ready.notify_one();
        }
        // Drain waits on in-flight keys only; a requeued key is pending.
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Add `key` after `delay`. Pending delayed adds are dropped on shutdown.
    pub async fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if self.is_shutting_down().await {
            return;
        }
        if delay.is_zero() {
            self.add(key).await;
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.timers.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key).await,
            }
        });
    }

    /// Add `key` after its rate limiter delay. Each call counts as a failure.
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.rate_limiter.when(&key);
        debug!(queue = %self.name, key = ?key, delay_ms = delay.as_millis() as u64, "requeue scheduled");
        self.add_after(key, delay).await;
    }

    /// Clear the retry history of `key`.
    pub fn forget(&self, key: &K) {
        self.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be processed.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }

    /// Stop handing out keys. Blocked [`WorkQueue::get`] calls return `None`.
    ///
    /// Returns true for the call that actually shut the queue down.
    pub async fn shut_down(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return false;
        }
        state.shutting_down = true;
        drop(state);

        self.timers.cancel();
        self.ready.notify_waiters();
        info!(queue = %self.name, "work queue shut down");
        true
    }

    /// Shut down, then wait until every in-flight key is marked done.
    pub async fn shut_down_with_drain(&self) -> bool {
        let first = self.shut_down().await;
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.state.lock().await.processing.is_empty() {
                return first;
            }
            idle.await;
        }
    }
}
