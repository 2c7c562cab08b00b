//! Run command - start the controller

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use humantime_serde::re::humantime;
use kcluster_controller::run_operator;
use kcluster_core::{ControllerConfig, StatusOutput};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bootstrap;
use crate::error::Result;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to a kubeconfig file (defaults to in-cluster or ~/.kube/config)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubernetes API server URL, overriding the kubeconfig
    #[arg(long)]
    pub master: Option<String>,

    /// Controller configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent reconcile workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum time to wait for nodes to become Ready (0 disables the wait)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub wait: Option<Duration>,

    /// Upper bound on one reconcile; must exceed --wait plus the poll interval
    #[arg(long, value_parser = humantime::parse_duration)]
    pub reconcile_timeout: Option<Duration>,

    /// Where to report reconcile progress: log, terminal or json
    #[arg(long)]
    pub status_output: Option<StatusOutput>,
}

impl RunArgs {
    /// Defaults, then the config file, then flags
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::load_from(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(wait) = self.wait {
            config = config.with_wait_for_ready(wait);
        }
        if let Some(timeout) = self.reconcile_timeout {
            config = config.with_reconcile_timeout(timeout);
        }
        if let Some(output) = self.status_output {
            config = config.with_status_output(output);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Run the controller until a shutdown signal arrives
pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.controller_config()?;
    let client = bootstrap::connect(args.kubeconfig.as_deref(), args.master.as_deref()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(bootstrap::shutdown_on_signal(shutdown.clone()));

    info!(
        workers = config.workers,
        wait_for_ready = %humantime::format_duration(config.wait_for_ready),
        status_output = %config.status_output,
        "Starting kcluster-operator"
    );
    run_operator(client, config, shutdown).await;
    Ok(())
}
