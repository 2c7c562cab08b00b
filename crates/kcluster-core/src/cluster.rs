//! KubernetesCluster custom resource
//!
//! A `KubernetesCluster` declares the desired cluster topology in `spec`.
//! The controller reads the spec and writes only `status`:
//! - **Phase**: Pending → Provisioning → Ready | Failed, monotonic per generation
//! - **Conditions**: ordered records upserted by type
//! - **Observed generation**: which spec generation the status describes

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::key::ResourceKey;

/// Label carried by the nodes of a cluster when no explicit selector is set
pub const CLUSTER_LABEL: &str = "kcluster.io/cluster";

/// Overall readiness of the resource
pub const CONDITION_READY: &str = "Ready";

/// Outcome of the node readiness wait
pub const CONDITION_NODES_READY: &str = "NodesReady";

static KUBERNETES_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?1\.\d+(\.\d+)?$").expect("valid regex"));

/// Desired state of a Kubernetes cluster.
///
/// Example:
/// ```yaml
/// apiVersion: ecs.kcluster.io/v1
/// kind: KubernetesCluster
/// metadata:
///   name: edge-1
///   namespace: prod
/// spec:
///   nodeCount: 3
///   provider: baremetal
///   kubernetesVersion: v1.31.2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ecs.kcluster.io",
    version = "v1",
    kind = "KubernetesCluster",
    plural = "kubernetesclusters",
    shortname = "kc",
    status = "KubernetesClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Nodes", "type":"integer", "jsonPath":".spec.nodeCount"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyNodes"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterSpec {
    /// Number of nodes expected to reach Ready
    pub node_count: u32,

    /// Provisioning backend that builds the nodes
    pub provider: String,

    /// Kubernetes version to install (e.g. `v1.31.2`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Provider-specific parameters, passed through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Labels selecting the nodes that belong to this cluster
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

impl KubernetesClusterSpec {
    /// Validate the declared topology
    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(CoreError::invalid_spec("nodeCount", "must be at least 1"));
        }
        if self.provider.trim().is_empty() {
            return Err(CoreError::invalid_spec("provider", "must not be empty"));
        }
        if let Some(version) = &self.kubernetes_version {
            if !KUBERNETES_VERSION.is_match(version) {
                return Err(CoreError::invalid_spec(
                    "kubernetesVersion",
                    format!("'{}' is not a Kubernetes 1.x version", version),
                ));
            }
        }
        for (k, v) in &self.node_selector {
            if k.is_empty() || k.contains(',') || k.contains('=') || v.contains(',') {
                return Err(CoreError::invalid_spec(
                    "nodeSelector",
                    format!("'{}={}' is not a valid label pair", k, v),
                ));
            }
        }
        Ok(())
    }

    /// Node selector to use for `cluster_name`, falling back to [`CLUSTER_LABEL`]
    pub fn effective_node_selector(&self, cluster_name: &str) -> BTreeMap<String, String> {
        if self.node_selector.is_empty() {
            BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster_name.to_string())])
        } else {
            self.node_selector.clone()
        }
    }
}

impl KubernetesCluster {
    /// Queue/cache key of this resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::of(self)
    }

    /// Spec generation, 0 when the server has not assigned one
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    /// Label selector string (`k=v,k2=v2`) for the nodes of this cluster
    pub fn node_label_selector(&self) -> String {
        self.spec
            .effective_node_selector(&self.name_any())
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether the recorded status already settled the current generation
    pub fn is_settled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.is_settled_for(self.generation()))
    }
}

/// Lifecycle phase of a provisioning attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Provisioning,
    Ready,
    Failed,
}

impl Phase {
    /// Ready and Failed end an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }

    /// Whether `next` is reachable from `self` within one attempt
    pub fn can_transition_to(&self, next: Phase) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Phase::Pending, _) => true,
            (Phase::Provisioning, Phase::Ready | Phase::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Provisioning => "Provisioning",
            Phase::Ready => "Ready",
            Phase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Observed state written by the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Spec generation this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub ready_nodes: u32,

    #[serde(default)]
    pub expected_nodes: u32,
}

impl KubernetesClusterStatus {
    /// Fresh status for a new spec generation
    pub fn for_generation(generation: i64) -> Self {
        Self {
            observed_generation: Some(generation),
            ..Default::default()
        }
    }

    /// Status to continue from for `generation`
    ///
    /// Keeps the current status while it describes the same generation,
    /// otherwise starts over at Pending.
    pub fn resume(current: Option<&Self>, generation: i64) -> Self {
        match current {
            Some(status) if status.observed_generation == Some(generation) => status.clone(),
            _ => Self::for_generation(generation),
        }
    }

    /// Move to `next`, rejecting regressions
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::PhaseRegression {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Terminal phase already reached for `generation`
    pub fn is_settled_for(&self, generation: i64) -> bool {
        self.phase.is_terminal() && self.observed_generation == Some(generation)
    }

    /// Insert or update the condition with the same type
    ///
    /// The transition time is kept when the status value did not change.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                let last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *existing = Condition {
                    last_transition_time,
                    ..condition
                };
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Tri-state condition value, as used throughout the Kubernetes API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observed condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    pub last_transition_time: DateTime<Utc>,

    /// CamelCase machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            last_transition_time: Utc::now(),
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn spec(node_count: u32) -> KubernetesClusterSpec {
        KubernetesClusterSpec {
            node_count,
            provider: "baremetal".to_string(),
            kubernetes_version: Some("v1.31.2".to_string()),
            parameters: BTreeMap::new(),
            node_selector: BTreeMap::new(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(spec(3).validate().is_ok());
    }

    #[test]
    fn test_validate_zero_nodes() {
        let err = spec(0).validate().unwrap_err();
        assert!(err.to_string().contains("nodeCount"));
    }

    #[test]
    fn test_validate_empty_provider() {
        let mut s = spec(1);
        s.provider = "  ".to_string();
        assert!(matches!(
            s.validate(),
            Err(CoreError::InvalidSpec { field, .. }) if field == "provider"
        ));
    }

    #[test]
    fn test_validate_versions() {
        for ok in ["v1.31", "1.29.4", "v1.8.0"] {
            let mut s = spec(1);
            s.kubernetes_version = Some(ok.to_string());
            assert!(s.validate().is_ok(), "{ok} should be accepted");
        }
        for bad in ["latest", "v2.0.0", "1", "v1.31.2-rc1"] {
            let mut s = spec(1);
            s.kubernetes_version = Some(bad.to_string());
            assert!(s.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_validate_selector() {
        let mut s = spec(1);
        s.node_selector.insert("pool,x".to_string(), "a".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_default_node_selector() {
        let cluster = KubernetesCluster::new("edge-1", spec(3));
        assert_eq!(cluster.node_label_selector(), "kcluster.io/cluster=edge-1");

        let mut custom = spec(3);
        custom.node_selector.insert("pool".to_string(), "gpu".to_string());
        custom.node_selector.insert("env".to_string(), "prod".to_string());
        let cluster = KubernetesCluster::new("edge-1", custom);
        assert_eq!(cluster.node_label_selector(), "env=prod,pool=gpu");
    }

    #[test]
    fn test_phase_transitions() {
        assert!(Phase::Pending.can_transition_to(Phase::Provisioning));
        assert!(Phase::Provisioning.can_transition_to(Phase::Ready));
        assert!(Phase::Provisioning.can_transition_to(Phase::Failed));
        assert!(Phase::Provisioning.can_transition_to(Phase::Provisioning));
        assert!(!Phase::Provisioning.can_transition_to(Phase::Pending));
        assert!(!Phase::Ready.can_transition_to(Phase::Provisioning));
        assert!(!Phase::Failed.can_transition_to(Phase::Ready));
    }

    #[test]
    fn test_advance_rejects_regression() {
        let mut status = KubernetesClusterStatus::for_generation(1);
        status.advance(Phase::Provisioning).unwrap();
        status.advance(Phase::Ready).unwrap();
        let err = status.advance(Phase::Provisioning).unwrap_err();
        assert!(matches!(
            err,
            CoreError::PhaseRegression {
                from: Phase::Ready,
                to: Phase::Provisioning
            }
        ));
        assert_eq!(status.phase, Phase::Ready);
    }

    #[test]
    fn test_resume_same_generation() {
        let mut status = KubernetesClusterStatus::for_generation(2);
        status.advance(Phase::Provisioning).unwrap();

        let resumed = KubernetesClusterStatus::resume(Some(&status), 2);
        assert_eq!(resumed.phase, Phase::Provisioning);

        let fresh = KubernetesClusterStatus::resume(Some(&status), 3);
        assert_eq!(fresh.phase, Phase::Pending);
        assert_eq!(fresh.observed_generation, Some(3));
    }

    #[test]
    fn test_settled() {
        let mut status = KubernetesClusterStatus::for_generation(4);
        assert!(!status.is_settled_for(4));
        status.advance(Phase::Failed).unwrap();
        assert!(status.is_settled_for(4));
        assert!(!status.is_settled_for(5));
    }

    #[test]
    fn test_set_condition_upserts_in_order() {
        let mut status = KubernetesClusterStatus::default();
        status.set_condition(Condition::new(
            CONDITION_NODES_READY,
            ConditionStatus::False,
            "Waiting",
            "0/3 ready",
        ));
        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "Provisioning",
            "",
        ));
        status.set_condition(Condition::new(
            CONDITION_NODES_READY,
            ConditionStatus::True,
            "NodesReady",
            "3/3 ready",
        ));

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].type_, CONDITION_NODES_READY);
        assert!(status.conditions[0].is_true());
        assert_eq!(status.conditions[0].message.as_deref(), Some("3/3 ready"));
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let mut status = KubernetesClusterStatus::default();
        let mut first = Condition::new(CONDITION_READY, ConditionStatus::False, "A", "a");
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original_time = first.last_transition_time;
        status.set_condition(first);

        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "B",
            "b",
        ));
        let cond = status.condition(CONDITION_READY).unwrap();
        assert_eq!(cond.last_transition_time, original_time);
        assert_eq!(cond.reason.as_deref(), Some("B"));

        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "C",
            "c",
        ));
        let cond = status.condition(CONDITION_READY).unwrap();
        assert!(cond.last_transition_time > original_time);
    }

    #[test]
    fn test_status_serialization() {
        let mut status = KubernetesClusterStatus::for_generation(1);
        status.advance(Phase::Ready).unwrap();
        status.ready_nodes = 3;
        status.expected_nodes = 3;

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "Ready");
        assert_eq!(json["observedGeneration"], 1);
        assert_eq!(json["readyNodes"], 3);
        assert!(json.get("conditions").is_none());
    }
}
