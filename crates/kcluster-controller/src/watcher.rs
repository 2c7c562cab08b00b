//! Turns watch events into work items
//!
//! The watch stream feeds a reflector store (the cache workers read from)
//! and, for every event that changes what the controller should do, adds
//! the object's key to the work queue. Status-only updates do not bump
//! `metadata.generation` and are not enqueued, so the controller's own
//! status writes never wake it up again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kcluster_core::{KubernetesCluster, ResourceKey};
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{EnqueueReason, WorkItem, WorkQueue};
use crate::store::ResourceStore;

/// What the watcher has enqueued so far
///
/// Tracks the last generation enqueued per key. A relist after a reconnect
/// (`Init` .. `InitDone`) never reports objects deleted while the watch was
/// down, so keys missing from the relist are enqueued as deleted once it
/// completes.
#[derive(Debug, Default)]
pub struct WatchState {
    seen: HashMap<ResourceKey, i64>,
    relist: Option<HashSet<ResourceKey>>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently known to exist
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.seen.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Work items for a watch event, possibly none
    pub fn work_items_for(&mut self, event: &watcher::Event<KubernetesCluster>) -> Vec<WorkItem> {
        match event {
            watcher::Event::Apply(obj) => self.applied(obj).into_iter().collect(),
            watcher::Event::InitApply(obj) => {
                if let Some(listed) = self.relist.as_mut() {
                    listed.insert(obj.key());
                }
                self.applied(obj).into_iter().collect()
            }
            watcher::Event::Delete(obj) => {
                let key = obj.key();
                self.seen.remove(&key);
                vec![WorkItem::new(key, EnqueueReason::Deleted)]
            }
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let Some(listed) = self.relist.take() else {
                    return Vec::new();
                };
                let mut gone: Vec<ResourceKey> = self
                    .seen
                    .keys()
                    .filter(|key| !listed.contains(*key))
                    .cloned()
                    .collect();
                gone.sort_by_key(|key| key.to_string());
                gone.into_iter()
                    .map(|key| {
                        self.seen.remove(&key);
                        WorkItem::new(key, EnqueueReason::Deleted)
                    })
                    .collect()
            }
        }
    }

    fn applied(&mut self, obj: &KubernetesCluster) -> Option<WorkItem> {
        let key = obj.key();
        let generation = obj.generation();
        match self.seen.insert(key.clone(), generation) {
            None => Some(WorkItem::new(key, EnqueueReason::Added)),
            Some(previous) if previous != generation => {
                Some(WorkItem::new(key, EnqueueReason::Updated))
            }
            Some(_) => None,
        }
    }
}

/// Watch `api`, keep `writer`'s store current and enqueue changed keys
///
/// Watch errors are retried with the default backoff. Returns when
/// `cancel` fires or the stream ends.
pub async fn run_watcher(
    api: Api<KubernetesCluster>,
    writer: Writer<KubernetesCluster>,
    queue: WorkQueue<ResourceKey>,
    cancel: CancellationToken,
) {
    info!("Watching KubernetesCluster resources");
    let stream = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
    tokio::pin!(stream);

    let mut state = WatchState::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Watcher stopping");
                break;
            }
            event = stream.next() => match event {
                Some(Ok(event)) => {
                    for item in state.work_items_for(&event) {
                        queue.enqueue(item);
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Watch error"),
                None => {
                    warn!("Watch stream ended");
                    break;
                }
            },
        }
    }
}

/// Enqueue every cached key each `period` (no-op when `period` is zero)
///
/// Resync catches anything the watch missed; settled resources are cheap
/// to skip.
pub async fn run_resync(
    store: Arc<dyn ResourceStore>,
    queue: WorkQueue<ResourceKey>,
    period: Duration,
    cancel: CancellationToken,
) {
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let keys = store.keys();
                debug!(count = keys.len(), "Resync");
                for key in keys {
                    queue.enqueue(WorkItem::new(key, EnqueueReason::Resync));
                }
            }
        }
    }
}
