//! Single-flight work queue.
//!
//! A key is never handed to two workers at once. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty, and it is queued again when the current worker calls `done`.
//! Delayed adds are coalesced per key to the earliest ready time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limiter::RateLimiter;

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys that must run again (queued, or waiting for `done`).
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Pending delayed adds: key → earliest ready time.
    waiting: HashMap<K, Instant>,
    limiter: Box<dyn RateLimiter<K>>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<QueueState<K>>,
    ready: Notify,
    shutdown: CancellationToken,
}

/// Cloneable handle to a shared work queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + Debug + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    limiter,
                    shutting_down: false,
                }),
                ready: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue `item` now.
    pub async fn add(&self, item: K) {
        let mut state = self.inner.state.lock().await;
        Self::insert(&mut state, item);
        drop(state);
        self.inner.ready.notify_one();
    }

    fn insert(state: &mut QueueState<K>, item: K) {
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if !state.processing.contains(&item) {
            state.queue.push_back(item);
        }
    }

    /// Queue `item` once `delay` has elapsed.
    pub async fn add_after(&self, item: K, delay: Duration) {
        if delay.is_zero() {
            self.add(item).await;
            return;
        }

        let ready_at = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&item) {
                // An earlier timer already covers this add.
                Some(existing) if *existing <= ready_at => return,
                _ => {
                    state.waiting.insert(item.clone(), ready_at);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(ready_at) => {}
                _ = queue.inner.shutdown.cancelled() => return,
            }
            let mut state = queue.inner.state.lock().await;
            // A later, earlier-firing timer may have replaced ours.
            if state.waiting.get(&item) != Some(&ready_at) {
                return;
            }
            state.waiting.remove(&item);
            Self::insert(&mut state, item);
            drop(state);
            queue.inner.ready.notify_one();
        });
    }

    /// Queue `item` after the delay the rate limiter assigns it.
    pub async fn add_rate_limited(&self, item: K) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.limiter.when(&item, Instant::now())
        };
        tracing::trace!(item = ?item, delay_ms = delay.as_millis() as u64, "rate limited requeue");
        self.add_after(item, delay).await;
    }

    /// Queue `item` again after a clean run, gated only by the limiter's
    /// throughput pacing. Per-key backoff is left untouched.
    pub async fn add_paced(&self, item: K) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.limiter.pace(Instant::now())
        };
        self.add_after(item, delay).await;
    }

    /// Clear rate limiter history for `item`.
    pub async fn forget(&self, item: &K) {
        self.inner.state.lock().await.limiter.forget(item);
    }

    pub async fn num_requeues(&self, item: &K) -> u32 {
        self.inner.state.lock().await.limiter.num_requeues(item)
    }

    /// Wait for the next item. `None` once the queue is shut down; work
    /// still queued at that point is dropped.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Register interest before checking so a notify in between is
            // not lost.
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.ready.notify_one();
                    }
                    return Some(item);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.shutdown.cancelled() => return None,
            }
        }
    }

    /// Mark `item` finished; re-queue it if it was added meanwhile.
    pub async fn done(&self, item: &K) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.ready.notify_one();
        }
    }

    /// Items ready to be handed out.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Items currently held by workers.
    pub async fn in_flight(&self) -> usize {
        self.inner.state.lock().await.processing.len()
    }

    /// Stop handing out work and cancel pending delayed adds.
    pub async fn shut_down(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.ready.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
