use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::agents::Agent;
use crate::agents::refinement::RefinementAgent;
use crate::core::types::{NodeName, RunState, StepResult};

use super::{Node, RunContext, inputs, non_blank};

/// Rewrites the effective query as an execution-ready instruction.
pub struct QueryRefinement;

impl Node for QueryRefinement {
    fn name(&self) -> NodeName {
        NodeName::QueryRefinement
    }

    fn action(&self) -> &'static str {
        RefinementAgent::NAME
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let agent_inputs = inputs([
            ("query", state.effective_query()),
            ("target", state.target.as_str()),
            (
                "feasibility",
                state.feasibility_message.as_deref().unwrap_or_default(),
            ),
        ]);
        let invocation = ctx.invoke::<RefinementAgent>(&agent_inputs, None)?;
        let refinement = invocation.output;

        state.refined_instruction = if invocation.succeeded {
            non_blank(&refinement.enhanced_prompt)
        } else {
            None
        };
        state.refinement_message = Some(refinement.agent_msg.clone());

        let ok = state.refined_instruction.is_some();
        if ok {
            info!(attempts = invocation.attempts, "instruction refined");
        } else {
            warn!(
                attempts = invocation.attempts,
                succeeded = invocation.succeeded,
                "refinement produced no instruction; task will use the effective query"
            );
        }
        Ok(StepResult::new(ok, refinement.agent_msg))
    }
}
