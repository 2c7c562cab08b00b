//! Writing observed state back to the resource
//!
//! Status writes carry the resource version the worker read, so a write
//! racing with another writer fails with [`ControllerError::Conflict`]
//! instead of silently overwriting newer state. Conflicts are retryable.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use kcluster_core::{KubernetesCluster, KubernetesClusterStatus, ResourceKey};
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tracing::debug;

use crate::error::{ControllerError, Result};
use crate::store::MemoryStore;

/// Persists `KubernetesClusterStatus`
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of `key`, guarded by `resource_version`
    ///
    /// Returns the resource version after the write.
    async fn update_status(
        &self,
        key: &ResourceKey,
        resource_version: &str,
        status: &KubernetesClusterStatus,
    ) -> Result<String>;
}

/// Writes the status subresource through the API server
pub struct KubeStatusWriter {
    client: kube::Client,
}

impl KubeStatusWriter {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn update_status(
        &self,
        key: &ResourceKey,
        resource_version: &str,
        status: &KubernetesClusterStatus,
    ) -> Result<String> {
        let api: Api<KubernetesCluster> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });

        let updated = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref resp) if resp.code == 409 => ControllerError::Conflict {
                    key: key.to_string(),
                    resource_version: resource_version.to_string(),
                },
                other => ControllerError::Api(other),
            })?;

        debug!(key = %key, phase = %status.phase, "Status updated");
        updated
            .metadata
            .resource_version
            .ok_or_else(|| ControllerError::Serialization("status response without resourceVersion".to_string()))
    }
}

/// Status writer backed by a [`MemoryStore`]
///
/// Enforces resource versions like the API server and records every
/// successful write. Failures can be injected to exercise retry paths.
#[derive(Clone)]
pub struct MemoryStatusWriter {
    store: MemoryStore,
    state: Arc<Mutex<WriterState>>,
}

#[derive(Default)]
struct WriterState {
    writes: Vec<(ResourceKey, KubernetesClusterStatus)>,
    conflicts: usize,
    errors: usize,
}

impl MemoryStatusWriter {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(WriterState::default())),
        }
    }

    /// Fail the next `n` writes with a conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.lock().conflicts = n;
    }

    /// Fail the next `n` writes with a transient error
    pub fn inject_errors(&self, n: usize) {
        self.lock().errors = n;
    }

    /// Successful writes, oldest first
    pub fn writes(&self) -> Vec<(ResourceKey, KubernetesClusterStatus)> {
        self.lock().writes.clone()
    }

    /// Statuses written for `key`, oldest first
    pub fn writes_for(&self, key: &ResourceKey) -> Vec<KubernetesClusterStatus> {
        self.lock()
            .writes
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusWriter for MemoryStatusWriter {
    async fn update_status(
        &self,
        key: &ResourceKey,
        resource_version: &str,
        status: &KubernetesClusterStatus,
    ) -> Result<String> {
        let mut state = self.lock();
        let conflict = || ControllerError::Conflict {
            key: key.to_string(),
            resource_version: resource_version.to_string(),
        };

        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(conflict());
        }
        if state.errors > 0 {
            state.errors -= 1;
            return Err(ControllerError::Transient("status write failed".to_string()));
        }

        let version = self
            .store
            .replace_status(key, resource_version, status)
            .ok_or_else(conflict)?;
        state.writes.push((key.clone(), status.clone()));
        Ok(version)
    }
}
