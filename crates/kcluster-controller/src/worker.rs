//! Reconcile workers
//!
//! A [`Controller`] owns the work queue and runs `workers` identical loops.
//! Each loop takes a key, re-reads the cached object, runs the action
//! pipeline and records the outcome in the resource status:
//!
//! - object gone: cleanup hook, forget
//! - status already settled for this generation: forget, nothing else
//! - pipeline succeeded: `Ready`, forget
//! - retryable failure: requeue with backoff (or `Failed` once the retry
//!   budget is spent)
//! - terminal failure: `Failed`, forget
//! - shutdown: drop the key without touching status
//!
//! A key is released with `done` on every path.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use kcluster_core::{
    CONDITION_NODES_READY, CONDITION_READY, Condition, ConditionStatus, ControllerConfig,
    KubernetesCluster, KubernetesClusterStatus, Phase, ResourceKey,
};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{WaitForReadyAction, default_pipeline};
use crate::error::{ControllerError, Result};
use crate::nodes::NodeReadinessPoller;
use crate::pipeline::{ActionContext, ActionPipeline, PipelineReport};
use crate::progress::StatusSink;
use crate::queue::WorkQueue;
use crate::status::StatusWriter;
use crate::store::ResourceStore;

/// Hook run when a reconciled object no longer exists
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    async fn cleanup(&self, key: &ResourceKey) -> Result<()>;
}

/// Cleanup hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleanup;

#[async_trait]
impl CleanupHandler for NoopCleanup {
    async fn cleanup(&self, key: &ResourceKey) -> Result<()> {
        debug!(key = %key, "Nothing to clean up");
        Ok(())
    }
}

/// How a single reconcile ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Object was deleted and cleanup ran
    Deleted,
    /// Status already described the current generation
    Skipped,
    /// Pipeline finished; carries the number of tolerated warnings
    Ready { warnings: usize },
    /// Retryable failure; the key was requeued
    Requeued,
    /// Terminal failure, or retries exhausted
    Failed,
    /// Shutdown interrupted the reconcile
    Cancelled,
}

/// Work queue plus the worker pool draining it
#[derive(Clone)]
pub struct Controller {
    queue: WorkQueue<ResourceKey>,
    store: Arc<dyn ResourceStore>,
    writer: Arc<dyn StatusWriter>,
    pipeline: Arc<ActionPipeline>,
    poller: Arc<NodeReadinessPoller>,
    sink: Arc<dyn StatusSink>,
    cleanup: Arc<dyn CleanupHandler>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller with the default pipeline and status sink
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ResourceStore>,
        writer: Arc<dyn StatusWriter>,
        poller: Arc<NodeReadinessPoller>,
    ) -> Self {
        Self {
            queue: WorkQueue::new(config.rate_limit.clone()),
            pipeline: Arc::new(default_pipeline(&config)),
            sink: Arc::new(config.status_output),
            cleanup: Arc::new(NoopCleanup),
            store,
            writer,
            poller,
            config,
        }
    }

    /// Replace the action pipeline
    pub fn with_pipeline(mut self, pipeline: ActionPipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<dyn CleanupHandler>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn queue(&self) -> &WorkQueue<ResourceKey> {
        &self.queue
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run the worker pool until `shutdown` fires
    ///
    /// Shutdown closes the queue and cancels in-flight pipelines; this
    /// returns once every worker has exited.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            workers = self.config.workers,
            wait_for_ready = ?self.config.wait_for_ready,
            "Starting reconcile workers"
        );

        let queue = self.queue.clone();
        let closer = shutdown.clone();
        let close = tokio::spawn(async move {
            closer.cancelled().await;
            queue.shut_down();
        });

        let workers = (0..self.config.workers).map(|id| {
            let controller = self.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                debug!(worker = id, "Worker started");
                while controller.process_next_item(&cancel).await {}
                debug!(worker = id, "Worker stopped");
            })
        });

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        close.abort();
        info!("All workers stopped");
    }

    /// Take one key off the queue and reconcile it
    ///
    /// Returns `false` once the queue has been shut down.
    pub async fn process_next_item(&self, cancel: &CancellationToken) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let outcome = self.reconcile(&key, cancel).await;
        debug!(key = %key, outcome = ?outcome, "Reconcile finished");
        self.queue.done(&key);
        true
    }

    /// Reconcile `key` once and apply the queue bookkeeping for the outcome
    ///
    /// The caller still owns the key and must call `done`.
    pub async fn reconcile(&self, key: &ResourceKey, cancel: &CancellationToken) -> ReconcileOutcome {
        let Some(cluster) = self.store.get(key) else {
            return self.handle_deleted(key).await;
        };

        if cluster.is_settled() {
            debug!(key = %key, generation = cluster.generation(), "Already settled, skipping");
            self.queue.forget(key);
            return ReconcileOutcome::Skipped;
        }

        info!(key = %key, generation = cluster.generation(), "Reconciling");
        let mut attempt = Attempt::begin(&cluster);

        if attempt.status.phase != Phase::Provisioning {
            if let Err(e) = attempt.status.advance(Phase::Provisioning) {
                return self.handle_failure(key, &mut attempt, e.into()).await;
            }
            if let Err(e) = self.write(key, &mut attempt).await {
                return self.handle_failure(key, &mut attempt, e).await;
            }
        }

        let ctx = ActionContext::new(
            cluster.clone(),
            self.sink.reporter(key),
            self.poller.clone(),
            cancel.child_token(),
        );
        let timeout = self.config.reconcile_timeout;
        let result = match tokio::time::timeout(timeout, self.pipeline.run(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Timeout(timeout)),
        };

        match result {
            Ok(report) => self.handle_success(key, &mut attempt, &ctx, &report).await,
            Err(e) => self.handle_failure(key, &mut attempt, e).await,
        }
    }

    async fn handle_deleted(&self, key: &ResourceKey) -> ReconcileOutcome {
        info!(key = %key, "Resource deleted, running cleanup");
        match self.cleanup.cleanup(key).await {
            Ok(()) => {
                self.queue.forget(key);
                ReconcileOutcome::Deleted
            }
            Err(e) if e.is_retryable() => {
                warn!(key = %key, error = %e, "Cleanup failed, retrying");
                match self.queue.add_rate_limited(key.clone()) {
                    Some(_) => ReconcileOutcome::Requeued,
                    None => {
                        error!(key = %key, "Giving up on cleanup");
                        self.queue.forget(key);
                        ReconcileOutcome::Failed
                    }
                }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Cleanup failed");
                self.queue.forget(key);
                ReconcileOutcome::Failed
            }
        }
    }

    async fn handle_success(
        &self,
        key: &ResourceKey,
        attempt: &mut Attempt,
        ctx: &ActionContext,
        report: &PipelineReport,
    ) -> ReconcileOutcome {
        if let Some(record) = ctx.last_readiness() {
            attempt.status.ready_nodes = record.ready;
        }

        let wait_warning = report.warning_for(WaitForReadyAction::NAME);
        let nodes_condition = match (wait_warning, ctx.last_readiness()) {
            (Some(w), _) => Condition::new(
                CONDITION_NODES_READY,
                ConditionStatus::False,
                "WaitTimeout",
                w.message.clone(),
            ),
            (None, Some(record)) => Condition::new(
                CONDITION_NODES_READY,
                ConditionStatus::True,
                "NodesReady",
                record.to_string(),
            ),
            (None, None) => Condition::new(
                CONDITION_NODES_READY,
                ConditionStatus::Unknown,
                "WaitSkipped",
                "Readiness wait disabled",
            ),
        };
        attempt.status.set_condition(nodes_condition);

        let message = if report.has_warnings() {
            let details: Vec<_> = report
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.action, w.message))
                .collect();
            format!("Provisioned with warnings: {}", details.join("; "))
        } else {
            "Provisioned".to_string()
        };
        attempt.status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "Provisioned",
            message,
        ));

        let unwritten = attempt.status.phase;
        if let Err(e) = attempt.status.advance(Phase::Ready) {
            return self.handle_failure(key, attempt, e.into()).await;
        }
        if let Err(e) = self.write(key, attempt).await {
            // Ready was never recorded; a retry status must not claim it
            attempt.status.phase = unwritten;
            return self.handle_failure(key, attempt, e).await;
        }

        for warning in &report.warnings {
            warn!(key = %key, action = %warning.action, "{}", warning.message);
        }
        info!(key = %key, warnings = report.warnings.len(), "Cluster ready");
        self.queue.forget(key);
        ReconcileOutcome::Ready {
            warnings: report.warnings.len(),
        }
    }

    async fn handle_failure(
        &self,
        key: &ResourceKey,
        attempt: &mut Attempt,
        err: ControllerError,
    ) -> ReconcileOutcome {
        if err.is_cancelled() {
            debug!(key = %key, "Reconcile cancelled by shutdown");
            return ReconcileOutcome::Cancelled;
        }

        if err.is_retryable() {
            if let Some(delay) = self.queue.add_rate_limited(key.clone()) {
                warn!(
                    key = %key,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    attempt = self.queue.num_requeues(key),
                    "Reconcile failed, retrying"
                );
                // a conflict means our resource version is stale
                if !err.is_conflict() {
                    attempt.status.set_condition(Condition::new(
                        CONDITION_READY,
                        ConditionStatus::False,
                        "Retrying",
                        err.to_string(),
                    ));
                    if let Err(e) = self.write(key, attempt).await {
                        debug!(key = %key, error = %e, "Could not record retry in status");
                    }
                }
                return ReconcileOutcome::Requeued;
            }

            error!(key = %key, error = %err, "Retries exhausted");
            self.mark_failed(key, attempt, "RetriesExhausted", &err).await
        } else {
            error!(key = %key, error = %err, "Reconcile failed");
            self.mark_failed(key, attempt, err.reason(), &err).await
        }
    }

    async fn mark_failed(
        &self,
        key: &ResourceKey,
        attempt: &mut Attempt,
        reason: &str,
        err: &ControllerError,
    ) -> ReconcileOutcome {
        attempt.status.phase = Phase::Failed;
        attempt.status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            reason,
            err.to_string(),
        ));

        if let Err(e) = self.write(key, attempt).await {
            if e.is_retryable() && self.queue.add_rate_limited(key.clone()).is_some() {
                warn!(key = %key, error = %e, "Could not record failure, retrying");
                return ReconcileOutcome::Requeued;
            }
            error!(key = %key, error = %e, "Could not record failure");
        }
        self.queue.forget(key);
        ReconcileOutcome::Failed
    }

    async fn write(&self, key: &ResourceKey, attempt: &mut Attempt) -> Result<()> {
        attempt.resource_version = self
            .writer
            .update_status(key, &attempt.resource_version, &attempt.status)
            .await?;
        Ok(())
    }
}

/// Status being built for one reconcile and the version it applies to
struct Attempt {
    status: KubernetesClusterStatus,
    resource_version: String,
}

impl Attempt {
    fn begin(cluster: &KubernetesCluster) -> Self {
        let mut status = KubernetesClusterStatus::resume(cluster.status.as_ref(), cluster.generation());
        status.expected_nodes = cluster.spec.node_count;
        Self {
            status,
            resource_version: cluster.resource_version().unwrap_or_default(),
        }
    }
}
