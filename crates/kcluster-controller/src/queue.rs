//! Deduplicating, rate-limited work queue
//!
//! Guarantees:
//! - a key is pending at most once, however many times it is added
//! - a key handed out by [`WorkQueue::get`] is not handed out again until
//!   [`WorkQueue::done`] is called for it
//! - a key added while in flight becomes pending again right after `done`
//!
//! Retries go through [`WorkQueue::add_rate_limited`], which delays the key by
//! an exponential backoff tracked per key until [`WorkQueue::forget`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kcluster_core::{RateLimitConfig, ResourceKey};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a key was put on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueReason {
    Added,
    Updated,
    Deleted,
    Resync,
    Retry,
}

impl fmt::Display for EnqueueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnqueueReason::Added => "added",
            EnqueueReason::Updated => "updated",
            EnqueueReason::Deleted => "deleted",
            EnqueueReason::Resync => "resync",
            EnqueueReason::Retry => "retry",
        };
        write!(f, "{}", s)
    }
}

/// A unit of work: which resource to reconcile and why
///
/// Carries no object payload; workers always re-read the cached object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: ResourceKey,
    pub reason: EnqueueReason,
}

impl WorkItem {
    pub fn new(key: ResourceKey, reason: EnqueueReason) -> Self {
        Self { key, reason }
    }
}

/// Shared handle to a work queue; clones refer to the same queue
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

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    shutdown: CancellationToken,
    rate_limit: RateLimitConfig,
}

struct State<K> {
    /// Pending keys in hand-out order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
{
    /// Create an empty queue using `rate_limit` for retries
    pub fn new(rate_limit: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                rate_limit,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing
    ///
    /// No-op if the key is already pending or the queue is shut down. A key
    /// that is in flight is remembered and queued again by [`Self::done`].
    pub fn add(&self, key: K) {
        {
            let mut state = self.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.inner.notify.notify_one();
    }

    /// Wait for the next key and mark it in flight
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
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

    /// Finish processing `key`, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Re-add `key` after its backoff delay
    ///
    /// Returns the delay used, or `None` when the key has used up its retry
    /// budget and was not re-added.
    pub fn add_rate_limited(&self, key: K) -> Option<Duration> {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            if *failures >= self.inner.rate_limit.max_retries {
                return None;
            }
            let delay = self.inner.rate_limit.delay_for(*failures);
            *failures += 1;
            delay
        };
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(key, delay);
        Some(delay)
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Number of rate-limited re-adds since the last [`Self::forget`]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Reject further adds and release every blocked [`Self::get`]
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of pending keys (not counting in-flight ones)
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WorkQueue<ResourceKey> {
    /// Add the key of a watch-produced work item
    pub fn enqueue(&self, item: WorkItem) {
        debug!(key = %item.key, reason = %item.reason, "Enqueueing");
        self.add(item.key);
    }
}
