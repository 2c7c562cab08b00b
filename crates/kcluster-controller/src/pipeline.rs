//! Ordered provisioning pipeline
//!
//! An [`ActionPipeline`] runs a fixed list of [`Action`]s against one
//! [`ActionContext`]. Each action either completes, reports a soft failure,
//! or returns an error (hard failure). What a failure means depends on the
//! action's [`FailurePolicy`]:
//!
//! | outcome         | `Abort`                      | `Continue`          |
//! |-----------------|------------------------------|---------------------|
//! | `Completed`     | next action                  | next action         |
//! | `SoftFailure`   | abort, terminal              | warn, next action   |
//! | `Err(e)`        | abort, retryable if `e` is   | warn, next action   |
//!
//! Cancellation always aborts. The pipeline never retries; retry policy
//! belongs to the worker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use kcluster_core::{KubernetesCluster, ResourceKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ControllerError, Result};
use crate::nodes::{NodeReadinessPoller, NodeReadinessRecord};
use crate::progress::StatusReporter;

/// What an action reports when it did not fail hard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    /// Informational failure; only tolerated under [`FailurePolicy::Continue`]
    SoftFailure { reason: String },
}

/// How the pipeline treats an action's failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Any failure stops the pipeline
    #[default]
    Abort,
    /// Failures are recorded as warnings and the pipeline continues
    Continue,
}

/// One provisioning step
#[async_trait]
pub trait Action: Send + Sync {
    /// Short identifier used in logs and status conditions
    fn name(&self) -> &str;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome>;
}

/// Everything one pipeline run needs; never shared between reconciles
pub struct ActionContext {
    /// Snapshot of the resource read from the cache
    pub cluster: Arc<KubernetesCluster>,
    pub key: ResourceKey,
    pub status: Arc<dyn StatusReporter>,
    pub nodes: Arc<NodeReadinessPoller>,
    /// Fires when the controller shuts down
    pub cancel: CancellationToken,
    readiness: Mutex<Option<NodeReadinessRecord>>,
}

impl ActionContext {
    pub fn new(
        cluster: Arc<KubernetesCluster>,
        status: Arc<dyn StatusReporter>,
        nodes: Arc<NodeReadinessPoller>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key: cluster.key(),
            cluster,
            status,
            nodes,
            cancel,
            readiness: Mutex::new(None),
        }
    }

    /// Remember the latest node observation for the status update
    pub fn record_readiness(&self, record: NodeReadinessRecord) {
        *self.readiness.lock().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }

    pub fn last_readiness(&self) -> Option<NodeReadinessRecord> {
        *self.readiness.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A tolerated failure, surfaced in the resource status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionWarning {
    pub action: String,
    pub message: String,
}

/// Summary of a pipeline run that did not abort
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Actions that ran, in order
    pub executed: Vec<String>,
    pub warnings: Vec<ActionWarning>,
}

impl PipelineReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn warning_for(&self, action: &str) -> Option<&ActionWarning> {
        self.warnings.iter().find(|w| w.action == action)
    }
}

/// Fixed, ordered list of actions
pub struct ActionPipeline {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionPipeline {
    pub fn builder() -> ActionPipelineBuilder {
        ActionPipelineBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names of the actions in execution order
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    /// Execute every action in order, stopping at the first hard failure
    ///
    /// Hard failures come back as [`ControllerError::ActionFailed`] naming
    /// the action; whether they are retryable follows the wrapped error.
    pub async fn run(&self, ctx: &ActionContext) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        for action in &self.actions {
            let name = action.name();
            if ctx.cancel.is_cancelled() {
                return Err(ControllerError::action(name, ControllerError::Cancelled));
            }

            let started = Instant::now();
            debug!(key = %ctx.key, action = name, "Executing action");
            let result = action.execute(ctx).await;
            report.executed.push(name.to_string());

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match (result, action.failure_policy()) {
                (Ok(ActionOutcome::Completed), _) => {
                    debug!(key = %ctx.key, action = name, elapsed_ms, "Action completed");
                }
                (Ok(ActionOutcome::SoftFailure { reason }), FailurePolicy::Continue) => {
                    warn!(key = %ctx.key, action = name, elapsed_ms, "Continuing after soft failure: {}", reason);
                    report.warnings.push(ActionWarning {
                        action: name.to_string(),
                        message: reason,
                    });
                }
                (Ok(ActionOutcome::SoftFailure { reason }), FailurePolicy::Abort) => {
                    return Err(ControllerError::action(
                        name,
                        ControllerError::InvalidSpec(reason),
                    ));
                }
                (Err(e), _) if e.is_cancelled() => {
                    return Err(ControllerError::action(name, e));
                }
                (Err(e), FailurePolicy::Continue) => {
                    warn!(key = %ctx.key, action = name, elapsed_ms, error = %e, "Continuing after action error");
                    report.warnings.push(ActionWarning {
                        action: name.to_string(),
                        message: e.to_string(),
                    });
                }
                (Err(e), FailurePolicy::Abort) => {
                    return Err(ControllerError::action(name, e));
                }
            }
        }

        Ok(report)
    }
}

#[derive(Default)]
pub struct ActionPipelineBuilder {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionPipelineBuilder {
    /// Append an action; actions run in the order they are added
    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn shared_action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn build(self) -> ActionPipeline {
        ActionPipeline {
            actions: self.actions,
        }
    }
}
