use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::Agent;
use crate::agents::feasibility::FeasibilityAgent;
use crate::core::types::{NodeName, RunState, StepResult};

use super::{Node, RunContext, inputs};

/// Asks the model whether the effective query can run on the captured page.
pub struct FeasibilityCheck;

impl Node for FeasibilityCheck {
    fn name(&self) -> NodeName {
        NodeName::FeasibilityCheck
    }

    fn action(&self) -> &'static str {
        FeasibilityAgent::NAME
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let agent_inputs = inputs([
            ("query", state.effective_query()),
            ("target", state.target.as_str()),
        ]);
        let invocation =
            ctx.invoke::<FeasibilityAgent>(&agent_inputs, state.capture_ref.as_deref())?;
        let verdict = invocation.output;

        state.feasible = Some(verdict.feasible);
        state.feasibility_message = Some(verdict.agent_msg.clone());

        info!(
            feasible = verdict.feasible,
            attempts = invocation.attempts,
            succeeded = invocation.succeeded,
            "feasibility checked"
        );
        Ok(StepResult::new(verdict.feasible, verdict.agent_msg))
    }
}
