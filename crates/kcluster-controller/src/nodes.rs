//! Node readiness polling
//!
//! A cluster is usable once enough of its nodes report the `Ready`
//! condition. [`NodeReadinessPoller`] evaluates that predicate on demand
//! ([`NodeReadinessPoller::check`]) or repeatedly until a deadline
//! ([`NodeReadinessPoller::wait_for_ready`]):
//! - the deadline is fixed by the caller before the first poll
//! - one sleep of at most the poll interval separates two checks
//! - the loop stops as soon as the cancellation token fires

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kcluster_core::KubernetesCluster;
use kube::ResourceExt;
use kube::api::{Api, ListParams};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ControllerError, Result};

/// Readiness of a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub name: String,
    pub ready: bool,
}

/// Result of one readiness poll; computed on demand, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReadinessRecord {
    /// Nodes the cluster declares
    pub expected: u32,
    /// Nodes reporting Ready
    pub ready: u32,
    /// Nodes matched by the selector, ready or not
    pub observed: u32,
}

impl NodeReadinessRecord {
    /// Record for a cluster whose nodes could not be listed yet
    pub fn unknown(expected: u32) -> Self {
        Self {
            expected,
            ready: 0,
            observed: 0,
        }
    }

    pub fn from_nodes(expected: u32, nodes: &[NodeState]) -> Self {
        Self {
            expected,
            ready: nodes.iter().filter(|n| n.ready).count() as u32,
            observed: nodes.len() as u32,
        }
    }

    /// The readiness predicate: at least `expected` nodes are Ready
    pub fn is_ready(&self) -> bool {
        self.ready >= self.expected
    }
}

impl std::fmt::Display for NodeReadinessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} nodes ready", self.ready, self.expected)
    }
}

/// Outcome of [`NodeReadinessPoller::wait_for_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Predicate held before the deadline
    Ready(NodeReadinessRecord),
    /// Deadline passed; carries the last successful observation
    TimedOut(NodeReadinessRecord),
    /// Shutdown was requested while waiting
    Cancelled,
}

/// Source of node status for a cluster
#[async_trait]
pub trait NodeLister: Send + Sync {
    async fn list_nodes(&self, cluster: &KubernetesCluster) -> Result<Vec<NodeState>>;
}

/// Lists `Node` objects matching the cluster's node selector
pub struct KubeNodeLister {
    client: kube::Client,
}

impl KubeNodeLister {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeLister for KubeNodeLister {
    async fn list_nodes(&self, cluster: &KubernetesCluster) -> Result<Vec<NodeState>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&cluster.node_label_selector());
        let nodes = api.list(&params).await.map_err(ControllerError::Api)?;

        Ok(nodes
            .items
            .iter()
            .map(|node| NodeState {
                name: node.name_any(),
                ready: node_is_ready(node),
            })
            .collect())
    }
}

/// Whether a node carries `Ready=True`
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Scriptable lister for tests and local runs
///
/// Reports `total` nodes of which `ready` are Ready; both can be changed
/// while a poll loop is running.
#[derive(Clone, Default)]
pub struct StaticNodeLister {
    state: Arc<Mutex<StaticNodes>>,
    calls: Arc<AtomicUsize>,
}

#[derive(Default)]
struct StaticNodes {
    total: u32,
    ready: u32,
    error: Option<String>,
}

impl StaticNodeLister {
    pub fn new(total: u32, ready: u32) -> Self {
        let lister = Self::default();
        lister.set_nodes(total, ready);
        lister
    }

    pub fn set_nodes(&self, total: u32, ready: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total = total;
        state.ready = ready.min(total);
    }

    /// Make subsequent lists fail with a transient error (`None` clears it)
    pub fn set_error(&self, error: Option<&str>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).error = error.map(String::from);
    }

    /// Number of list calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeLister for StaticNodeLister {
    async fn list_nodes(&self, cluster: &KubernetesCluster) -> Result<Vec<NodeState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = &state.error {
            return Err(ControllerError::Transient(error.clone()));
        }
        Ok((0..state.total)
            .map(|i| NodeState {
                name: format!("{}-node-{}", cluster.name_any(), i),
                ready: i < state.ready,
            })
            .collect())
    }
}

/// Evaluates the readiness predicate against a [`NodeLister`]
pub struct NodeReadinessPoller {
    lister: Arc<dyn NodeLister>,
    interval: Duration,
}

impl NodeReadinessPoller {
    /// Create a poller checking every `interval`
    pub fn new(lister: Arc<dyn NodeLister>, interval: Duration) -> Self {
        Self { lister, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll once
    pub async fn check(&self, cluster: &KubernetesCluster) -> Result<NodeReadinessRecord> {
        let nodes = self.lister.list_nodes(cluster).await?;
        Ok(NodeReadinessRecord::from_nodes(cluster.spec.node_count, &nodes))
    }

    /// Poll until the predicate holds, `deadline` passes, or `cancel` fires
    ///
    /// Failed polls count as "not ready". A single poll is bounded by the
    /// time left plus one interval, so the call never blocks much longer
    /// than the deadline.
    pub async fn wait_for_ready(
        &self,
        cluster: &KubernetesCluster,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> WaitResult {
        let mut last = NodeReadinessRecord::unknown(cluster.spec.node_count);

        loop {
            let budget = deadline.saturating_duration_since(Instant::now()) + self.interval;
            tokio::select! {
                _ = cancel.cancelled() => return WaitResult::Cancelled,
                polled = tokio::time::timeout(budget, self.check(cluster)) => match polled {
                    Ok(Ok(record)) if record.is_ready() => return WaitResult::Ready(record),
                    Ok(Ok(record)) => last = record,
                    Ok(Err(e)) => debug!(cluster = %cluster.key(), error = %e, "Node readiness check failed"),
                    Err(_) => debug!(cluster = %cluster.key(), "Node readiness check timed out"),
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitResult::TimedOut(last);
            }

            let pause = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return WaitResult::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kcluster_core::KubernetesClusterSpec;

    fn cluster(node_count: u32) -> KubernetesCluster {
        let mut c = KubernetesCluster::new(
            "edge-1",
            KubernetesClusterSpec {
                node_count,
                provider: "baremetal".to_string(),
                kubernetes_version: None,
                parameters: Default::default(),
                node_selector: Default::default(),
            },
        );
        c.metadata.namespace = Some("prod".to_string());
        c
    }

    fn node(conditions: Vec<(&str, &str)>) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(
                    conditions
                        .into_iter()
                        .map(|(t, s)| NodeCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_is_ready() {
        assert!(node_is_ready(&node(vec![("MemoryPressure", "False"), ("Ready", "True")])));
        assert!(!node_is_ready(&node(vec![("Ready", "False")])));
        assert!(!node_is_ready(&node(vec![("Ready", "Unknown")])));
        assert!(!node_is_ready(&Node::default()));
    }

    #[test]
    fn test_record_predicate() {
        let nodes = vec![
            NodeState { name: "a".into(), ready: true },
            NodeState { name: "b".into(), ready: false },
            NodeState { name: "c".into(), ready: true },
        ];
        let record = NodeReadinessRecord::from_nodes(3, &nodes);
        assert_eq!(record.ready, 2);
        assert_eq!(record.observed, 3);
        assert!(!record.is_ready());
        assert_eq!(record.to_string(), "2/3 nodes ready");

        assert!(NodeReadinessRecord::from_nodes(2, &nodes).is_ready());
    }

    #[tokio::test]
    async fn test_check_once() {
        let lister = StaticNodeLister::new(3, 3);
        let poller = NodeReadinessPoller::new(Arc::new(lister.clone()), Duration::from_secs(1));

        let record = poller.check(&cluster(3)).await.unwrap();
        assert!(record.is_ready());
        assert_eq!(lister.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_ready() {
        let lister = StaticNodeLister::new(3, 1);
        let poller = NodeReadinessPoller::new(Arc::new(lister.clone()), Duration::from_millis(500));
        let start = Instant::now();

        let flip = lister.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_200)).await;
            flip.set_nodes(3, 3);
        });

        let result = poller
            .wait_for_ready(&cluster(3), start + Duration::from_secs(10), &CancellationToken::new())
            .await;

        assert!(matches!(result, WaitResult::Ready(r) if r.ready == 3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1_200));
        assert!(elapsed <= Duration::from_millis(1_700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_bounded_polls() {
        let lister = StaticNodeLister::new(3, 2);
        let poller = NodeReadinessPoller::new(Arc::new(lister.clone()), Duration::from_secs(1));
        let start = Instant::now();

        let result = poller
            .wait_for_ready(&cluster(3), start + Duration::from_secs(5), &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            WaitResult::TimedOut(NodeReadinessRecord {
                expected: 3,
                ready: 2,
                observed: 3
            })
        );
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() <= Duration::from_secs(6));
        // W / interval + 1
        assert_eq!(lister.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_treats_errors_as_not_ready() {
        let lister = StaticNodeLister::new(3, 3);
        lister.set_error(Some("apiserver unavailable"));
        let poller = NodeReadinessPoller::new(Arc::new(lister.clone()), Duration::from_secs(1));

        let recover = lister.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            recover.set_error(None);
        });

        let start = Instant::now();
        let result = poller
            .wait_for_ready(&cluster(3), start + Duration::from_secs(10), &CancellationToken::new())
            .await;
        assert!(matches!(result, WaitResult::Ready(_)));
        assert_eq!(lister.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stops_on_cancel() {
        let lister = StaticNodeLister::new(3, 0);
        let poller = NodeReadinessPoller::new(Arc::new(lister.clone()), Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_300)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = poller
            .wait_for_ready(&cluster(3), start + Duration::from_secs(60), &cancel)
            .await;

        assert_eq!(result, WaitResult::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
