//! Kubernetes client construction and process signals

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CliError, Result};

/// Build a client and check the API server answers
///
/// Uses `kubeconfig` when given, otherwise the usual inference order
/// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account). `master`
/// overrides the server URL of whichever config was loaded, and is used on
/// its own when inference finds nothing.
pub async fn connect(kubeconfig: Option<&Path>, master: Option<&str>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                CliError::kube_config(format!("cannot read {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| CliError::kube_config(e.to_string()))?
        }
        None => match Config::infer().await {
            Ok(config) => config,
            Err(e) if master.is_some() => {
                // --master alone is enough; the URL is set below
                info!(error = %e, "No kubeconfig or in-cluster config, using --master only");
                Config::new(Default::default())
            }
            Err(e) => return Err(CliError::kube_config(e.to_string())),
        },
    };

    if let Some(master) = master {
        config.cluster_url = match master.parse() {
            Ok(url) => url,
            Err(e) => {
                return Err(CliError::config_with_help(
                    format!("invalid --master URL '{}': {}", master, e),
                    "Use a full URL such as https://10.0.0.1:6443",
                ));
            }
        };
    }

    let server = config.cluster_url.to_string();
    let client = Client::try_from(config).map_err(|e| CliError::kube_config(e.to_string()))?;
    let version = client
        .apiserver_version()
        .await
        .map_err(|e| CliError::connection(e.to_string(), &server))?;

    info!(server = %server, version = %version.git_version, "Connected to Kubernetes API server");
    Ok(client)
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
pub async fn shutdown_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                return;
            }
            info!("Received Ctrl-C, shutting down");
        }
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
