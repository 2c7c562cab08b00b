//! Error types for kcluster-controller

use std::time::Duration;

use thiserror::Error;

/// Result type for kcluster-controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors that can occur while reconciling a KubernetesCluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Status write lost an optimistic-concurrency race
    #[error("conflicting update to '{key}': resource version {resource_version} is stale")]
    Conflict {
        key: String,
        resource_version: String,
    },

    /// Failure expected to clear up on its own (network blip, busy backend)
    #[error("transient error: {0}")]
    Transient(String),

    /// DesiredSpec cannot be acted on
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A pipeline action reported a hard failure
    #[error("action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Pipeline did not finish within the reconcile timeout
    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),

    /// Work abandoned because the controller is shutting down
    #[error("cancelled by shutdown")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Resource schema or config error
    #[error(transparent)]
    Core(#[from] kcluster_core::CoreError),
}

impl From<serde_json::Error> for ControllerError {
    fn from(e: serde_json::Error) -> Self {
        ControllerError::Serialization(e.to_string())
    }
}

impl ControllerError {
    /// Wrap an error raised by the named action
    pub fn action(action: impl Into<String>, source: ControllerError) -> Self {
        ControllerError::ActionFailed {
            action: action.into(),
            source: Box::new(source),
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409 or a stale resource version)
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict { .. } => true,
            ControllerError::Api(kube::Error::Api(resp)) => resp.code == 409,
            ControllerError::ActionFailed { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Check if this is a shutdown cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            ControllerError::Cancelled => true,
            ControllerError::ActionFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the reconcile should be retried with backoff
    ///
    /// Terminal errors mark the resource Failed until its spec changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Api(kube::Error::Api(resp)) => {
                resp.code >= 500 || resp.code == 429 || resp.code == 409
            }
            ControllerError::Api(kube::Error::Auth(_)) => false,
            ControllerError::Api(_) => true,
            ControllerError::Conflict { .. }
            | ControllerError::Transient(_)
            | ControllerError::Timeout(_) => true,
            ControllerError::ActionFailed { source, .. } => source.is_retryable(),
            ControllerError::InvalidSpec(_)
            | ControllerError::Cancelled
            | ControllerError::Serialization(_)
            | ControllerError::Core(_) => false,
        }
    }

    /// CamelCase reason recorded in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Api(_) => "ApiError",
            ControllerError::Conflict { .. } => "Conflict",
            ControllerError::Transient(_) => "TransientError",
            ControllerError::InvalidSpec(_) | ControllerError::Core(_) => "InvalidSpec",
            ControllerError::ActionFailed { .. } => "ActionFailed",
            ControllerError::Timeout(_) => "Timeout",
            ControllerError::Cancelled => "Cancelled",
            ControllerError::Serialization(_) => "SerializationError",
        }
    }
}
