use anyhow::Result;
use tracing::{info, instrument};

use crate::core::types::{NodeName, RunState, StepResult};

use super::{Node, RunContext};

pub const TARGET_FOUND: &str = "Webpage exists and is valid";
pub const TARGET_MISSING: &str = "Webpage does not exist or is invalid";

/// Probes the target page.
pub struct TargetExistenceCheck;

impl Node for TargetExistenceCheck {
    fn name(&self) -> NodeName {
        NodeName::TargetExistenceCheck
    }

    fn action(&self) -> &'static str {
        "probe"
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id, url = %state.target))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let exists = ctx.collaborators.probe.exists(&state.target);
        let message = if exists { TARGET_FOUND } else { TARGET_MISSING };

        state.target_ok = Some(exists);
        state.target_message = Some(message.to_string());

        info!(exists, "target probed");
        Ok(StepResult::new(exists, message))
    }
}
