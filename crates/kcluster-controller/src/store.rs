//! Read access to the cached KubernetesCluster objects
//!
//! Workers never read the API server directly; they look objects up in a
//! [`ResourceStore`] kept current by the watcher. [`MemoryStore`] is an
//! in-memory stand-in that also plays the API server's part for status
//! writes in tests.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use kcluster_core::{KubernetesCluster, KubernetesClusterStatus, ResourceKey};
use kube::runtime::reflector::{ObjectRef, Store};

/// Lookup of the latest observed objects by key
pub trait ResourceStore: Send + Sync {
    /// The cached object, or `None` once it has been deleted
    fn get(&self, key: &ResourceKey) -> Option<Arc<KubernetesCluster>>;

    /// Keys of every cached object
    fn keys(&self) -> Vec<ResourceKey>;
}

impl ResourceStore for Store<KubernetesCluster> {
    fn get(&self, key: &ResourceKey) -> Option<Arc<KubernetesCluster>> {
        Store::get(self, &ObjectRef::new(&key.name).within(&key.namespace))
    }

    fn keys(&self) -> Vec<ResourceKey> {
        self.state().iter().map(|obj| obj.key()).collect()
    }
}

/// Shared in-memory object cache
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<ResourceKey, Arc<KubernetesCluster>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, returning its key
    ///
    /// Missing metadata is filled in like the API server would: generation
    /// starts at 1 and resource versions are numeric.
    pub fn insert(&self, mut cluster: KubernetesCluster) -> ResourceKey {
        if cluster.metadata.namespace.is_none() {
            cluster.metadata.namespace = Some("default".to_string());
        }
        cluster.metadata.generation.get_or_insert(1);
        cluster
            .metadata
            .resource_version
            .get_or_insert_with(|| "1".to_string());

        let key = cluster.key();
        self.write().insert(key.clone(), Arc::new(cluster));
        key
    }

    pub fn remove(&self, key: &ResourceKey) -> Option<Arc<KubernetesCluster>> {
        self.write().remove(key)
    }

    /// Apply a spec edit, bumping generation and resource version
    pub fn update_spec<F>(&self, key: &ResourceKey, edit: F) -> bool
    where
        F: FnOnce(&mut KubernetesCluster),
    {
        let mut objects = self.write();
        let Some(current) = objects.get(key) else {
            return false;
        };
        let mut next = (**current).clone();
        edit(&mut next);
        next.metadata.generation = Some(current.generation() + 1);
        next.metadata.resource_version = Some(bump(current.metadata.resource_version.as_deref()));
        objects.insert(key.clone(), Arc::new(next));
        true
    }

    /// Replace the status if `resource_version` is current
    ///
    /// Returns the new resource version, or `None` on a version mismatch or
    /// missing object.
    pub fn replace_status(
        &self,
        key: &ResourceKey,
        resource_version: &str,
        status: &KubernetesClusterStatus,
    ) -> Option<String> {
        let mut objects = self.write();
        let current = objects.get(key)?;
        if current.metadata.resource_version.as_deref() != Some(resource_version) {
            return None;
        }
        let mut next = (**current).clone();
        let version = bump(Some(resource_version));
        next.status = Some(status.clone());
        next.metadata.resource_version = Some(version.clone());
        objects.insert(key.clone(), Arc::new(next));
        Some(version)
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ResourceKey, Arc<KubernetesCluster>>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceStore for MemoryStore {
    fn get(&self, key: &ResourceKey) -> Option<Arc<KubernetesCluster>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

fn bump(version: Option<&str>) -> String {
    let current = version.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (current + 1).to_string()
}
