use async_trait::async_trait;

use crate::error::{ControllerError, Result};
use crate::pipeline::{Action, ActionContext, ActionOutcome};

/// Rejects specs the controller cannot act on
///
/// Failures are terminal: retrying an invalid spec cannot succeed until the
/// user edits the resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateSpecAction;

#[async_trait]
impl Action for ValidateSpecAction {
    fn name(&self) -> &str {
        "validate-spec"
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        ctx.cluster
            .spec
            .validate()
            .map_err(|e| ControllerError::InvalidSpec(e.to_string()))?;
        Ok(ActionOutcome::Completed)
    }
}
