use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::Agent;
use crate::agents::intent::IntentAgent;
use crate::core::types::{NodeName, RunState, StepResult};

use super::{Node, RunContext, inputs, non_blank};

/// Classifies the query as a QA request and may narrow it.
pub struct IntentCheck;

impl Node for IntentCheck {
    fn name(&self) -> NodeName {
        NodeName::IntentCheck
    }

    fn action(&self) -> &'static str {
        IntentAgent::NAME
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let invocation = ctx.invoke::<IntentAgent>(&inputs([("query", state.query.as_str())]), None)?;
        let verdict = invocation.output;

        state.intent_ok = Some(verdict.intent);
        state.intent_message = Some(verdict.agent_msg.clone());
        state.rewritten_query = if verdict.intent {
            non_blank(&verdict.modified_prompt)
        } else {
            None
        };

        info!(
            intent = verdict.intent,
            rewritten = state.rewritten_query.is_some(),
            attempts = invocation.attempts,
            succeeded = invocation.succeeded,
            "intent checked"
        );
        Ok(StepResult::new(verdict.intent, verdict.agent_msg))
    }
}
