//! Wiring of watcher, resync and workers against a live API server

use std::sync::Arc;

use kcluster_core::{ControllerConfig, KubernetesCluster};
use kube::api::Api;
use kube::runtime::reflector;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::nodes::{KubeNodeLister, NodeReadinessPoller};
use crate::status::KubeStatusWriter;
use crate::watcher::{run_resync, run_watcher};
use crate::worker::Controller;

/// Run the controller until `shutdown` fires
///
/// Watches every namespace. Workers finish or abandon their current item
/// before this returns.
pub async fn run_operator(client: kube::Client, config: ControllerConfig, shutdown: CancellationToken) {
    let api: Api<KubernetesCluster> = Api::all(client.clone());
    let (reader, writer) = reflector::store();

    let poller = NodeReadinessPoller::new(
        Arc::new(KubeNodeLister::new(client.clone())),
        config.poll_interval,
    );
    let controller = Controller::new(
        config.clone(),
        Arc::new(reader.clone()),
        Arc::new(KubeStatusWriter::new(client)),
        Arc::new(poller),
    );

    let watch = tokio::spawn(run_watcher(
        api,
        writer,
        controller.queue().clone(),
        shutdown.clone(),
    ));
    let resync = tokio::spawn(run_resync(
        Arc::new(reader),
        controller.queue().clone(),
        config.resync_period,
        shutdown.clone(),
    ));

    controller.run(shutdown).await;

    // both loops exit on the same token
    let _ = tokio::join!(watch, resync);
    info!("Controller stopped");
}
