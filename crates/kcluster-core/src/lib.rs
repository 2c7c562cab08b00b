//! kcluster Core - Core types for the KubernetesCluster controller
//!
//! This crate provides the foundational types used throughout kcluster:
//! - `KubernetesCluster`: The custom resource (desired spec + observed status)
//! - `ResourceKey`: The `(namespace, name)` identity used for queueing and lookups
//! - `ControllerConfig`: Immutable controller configuration

pub mod cluster;
pub mod config;
pub mod error;
pub mod key;

pub use cluster::{
    CLUSTER_LABEL, CONDITION_NODES_READY, CONDITION_READY, Condition, ConditionStatus,
    KubernetesCluster, KubernetesClusterSpec, KubernetesClusterStatus, Phase,
};
pub use config::{ControllerConfig, RateLimitConfig, StatusOutput};
pub use error::{CoreError, Result};
pub use key::ResourceKey;
