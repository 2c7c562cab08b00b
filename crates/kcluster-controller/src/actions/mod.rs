//! Built-in provisioning actions

mod validate;
mod wait_for_ready;

pub use validate::ValidateSpecAction;
pub use wait_for_ready::WaitForReadyAction;

use kcluster_core::ControllerConfig;

use crate::pipeline::ActionPipeline;

/// Pipeline used by the controller: validate the spec, then wait for nodes
pub fn default_pipeline(config: &ControllerConfig) -> ActionPipeline {
    ActionPipeline::builder()
        .action(ValidateSpecAction)
        .action(WaitForReadyAction::new(config.wait_for_ready))
        .build()
}
