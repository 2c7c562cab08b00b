//! Crd command - print the KubernetesCluster CustomResourceDefinition

use kcluster_core::KubernetesCluster;
use kube::CustomResourceExt;

use crate::error::{CliError, Result};

/// Print the CRD as YAML, ready for `kubectl apply -f -`
pub fn run() -> Result<()> {
    let yaml = serde_yaml::to_string(&KubernetesCluster::crd())
        .map_err(|e| CliError::internal(format!("cannot serialize CRD: {}", e)))?;
    print!("{}", yaml);
    Ok(())
}
