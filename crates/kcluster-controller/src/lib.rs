//! kcluster-controller - reconciliation controller for KubernetesCluster resources
//!
//! This crate provides:
//! - **Work Queue**: deduplicating, rate-limited queue with at most one worker per key
//! - **Workers**: reconcile loop recording each outcome in the resource status
//! - **Action Pipeline**: ordered provisioning steps with per-action failure policies
//! - **Readiness Polling**: deadline-bounded, cancellable node readiness checks
//! - **Status Reporting**: per-reconcile progress as logs, terminal lines or JSON
//! - **Watcher**: reflector-backed cache feeding the queue, plus periodic resync

pub mod actions;
pub mod error;
pub mod nodes;
pub mod operator;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod status;
pub mod store;
pub mod watcher;
pub mod worker;

pub use actions::{ValidateSpecAction, WaitForReadyAction, default_pipeline};
pub use error::{ControllerError, Result};
pub use nodes::{
    KubeNodeLister, NodeLister, NodeReadinessPoller, NodeReadinessRecord, NodeState,
    StaticNodeLister, WaitResult,
};
pub use operator::run_operator;
pub use pipeline::{
    Action, ActionContext, ActionOutcome, ActionPipeline, ActionWarning, FailurePolicy,
    PipelineReport,
};
pub use progress::{
    JsonStatus, LogStatus, RecordingSink, StatusEvent, StatusReporter, StatusSink, TerminalStatus,
};
pub use queue::{EnqueueReason, WorkItem, WorkQueue};
pub use status::{KubeStatusWriter, MemoryStatusWriter, StatusWriter};
pub use store::{MemoryStore, ResourceStore};
pub use worker::{CleanupHandler, Controller, NoopCleanup, ReconcileOutcome};
