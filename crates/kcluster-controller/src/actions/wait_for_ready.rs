//! Waits for the cluster's nodes to report Ready
//!
//! A timeout is not an error: the action reports a soft failure, the
//! warning lands in the resource status, and later actions still run.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ControllerError, Result};
use crate::nodes::WaitResult;
use crate::pipeline::{Action, ActionContext, ActionOutcome, FailurePolicy};
use crate::progress::format_duration;

/// Blocks until the readiness predicate holds or `wait` elapses
///
/// A zero `wait` disables the action entirely; no node is ever listed.
#[derive(Debug, Clone, Copy)]
pub struct WaitForReadyAction {
    wait: Duration,
}

impl WaitForReadyAction {
    /// Action name, also the key of its pipeline warnings
    pub const NAME: &'static str = "wait-for-ready";

    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

#[async_trait]
impl Action for WaitForReadyAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Continue
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        if self.wait.is_zero() {
            return Ok(ActionOutcome::Completed);
        }

        ctx.status.start(&format!(
            "Waiting ≤ {} for nodes = Ready",
            format_duration(self.wait)
        ));
        let started = Instant::now();
        let deadline = started + self.wait;

        match ctx
            .nodes
            .wait_for_ready(&ctx.cluster, deadline, &ctx.cancel)
            .await
        {
            WaitResult::Ready(record) => {
                ctx.record_readiness(record);
                ctx.status.end(true);
                ctx.status.info(&format!(
                    "Ready after {}",
                    format_duration(started.elapsed())
                ));
                Ok(ActionOutcome::Completed)
            }
            WaitResult::TimedOut(record) => {
                ctx.record_readiness(record);
                ctx.status.end(false);
                let reason = format!("WARNING: Timed out waiting for Ready ({})", record);
                ctx.status.warn(&reason);
                Ok(ActionOutcome::SoftFailure { reason })
            }
            WaitResult::Cancelled => {
                ctx.status.end(false);
                Err(ControllerError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeReadinessPoller, StaticNodeLister};
    use crate::pipeline::ActionPipeline;
    use crate::progress::{RecordingSink, StatusEvent, StatusSink};
    use kcluster_core::{KubernetesCluster, KubernetesClusterSpec};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Harness {
        lister: StaticNodeLister,
        sink: RecordingSink,
        ctx: ActionContext,
    }

    fn harness(node_count: u32, ready: u32, interval: Duration) -> Harness {
        let mut cluster = KubernetesCluster::new(
            "edge-1",
            KubernetesClusterSpec {
                node_count,
                provider: "baremetal".to_string(),
                kubernetes_version: None,
                parameters: Default::default(),
                node_selector: Default::default(),
            },
        );
        cluster.metadata.namespace = Some("prod".to_string());
        let key = cluster.key();
        let lister = StaticNodeLister::new(node_count, ready);
        let sink = RecordingSink::new();
        let ctx = ActionContext::new(
            Arc::new(cluster),
            sink.reporter(&key),
            Arc::new(NodeReadinessPoller::new(Arc::new(lister.clone()), interval)),
            CancellationToken::new(),
        );
        Harness { lister, sink, ctx }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_never_polls() {
        let h = harness(3, 0, Duration::from_secs(1));
        let started = Instant::now();

        let outcome = WaitForReadyAction::new(Duration::ZERO)
            .execute(&h.ctx)
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(h.lister.calls(), 0);
        assert!(h.sink.events().is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_time_to_ready() {
        let h = harness(3, 1, Duration::from_secs(1));
        let flip = h.lister.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3_100)).await;
            flip.set_nodes(3, 3);
        });

        let outcome = WaitForReadyAction::new(Duration::from_secs(60))
            .execute(&h.ctx)
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(h.ctx.last_readiness().map(|r| r.ready), Some(3));

        let events = h.sink.events();
        let key = h.ctx.key.clone();
        assert_eq!(
            events[0],
            StatusEvent::Start {
                key: key.clone(),
                message: "Waiting ≤ 1m for nodes = Ready".to_string()
            }
        );
        assert_eq!(events[1], StatusEvent::End { key: key.clone(), success: true });
        assert_eq!(
            events[2],
            StatusEvent::Info {
                key,
                message: "Ready after 4s".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_soft() {
        let h = harness(3, 2, Duration::from_secs(1));
        let started = Instant::now();

        let outcome = WaitForReadyAction::new(Duration::from_secs(5))
            .execute(&h.ctx)
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed <= Duration::from_secs(6));
        assert!(matches!(outcome, ActionOutcome::SoftFailure { .. }));
        assert_eq!(
            h.sink.warnings_for(&h.ctx.key),
            vec!["WARNING: Timed out waiting for Ready (2/3 nodes ready)".to_string()]
        );
        assert_eq!(h.ctx.last_readiness().map(|r| r.ready), Some(2));
    }

    /// Flags that it ran
    struct Marker(Arc<AtomicBool>);

    #[async_trait]
    impl Action for Marker {
        fn name(&self) -> &str {
            "marker"
        }

        async fn execute(&self, _ctx: &ActionContext) -> Result<ActionOutcome> {
            self.0.store(true, Ordering::SeqCst);
            Ok(ActionOutcome::Completed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_stop_pipeline() {
        let h = harness(3, 0, Duration::from_secs(1));
        let ran = Arc::new(AtomicBool::new(false));
        let pipeline = ActionPipeline::builder()
            .action(WaitForReadyAction::new(Duration::from_secs(2)))
            .action(Marker(ran.clone()))
            .build();

        let report = pipeline.run(&h.ctx).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(report.warning_for("wait-for-ready").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_hard() {
        let h = harness(3, 0, Duration::from_secs(1));
        let trigger = h.ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            trigger.cancel();
        });

        let err = WaitForReadyAction::new(Duration::from_secs(30))
            .execute(&h.ctx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
