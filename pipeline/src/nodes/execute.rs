use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::types::{NodeName, RunState, StepResult, TaskResult};
use crate::io::automation::TaskRequest;

use super::{Node, ProgressEvent, RunContext};

/// Hands the instruction to the automation collaborator.
pub struct ExecuteTask;

impl Node for ExecuteTask {
    fn name(&self) -> NodeName {
        NodeName::ExecuteTask
    }

    fn action(&self) -> &'static str {
        "run_task"
    }

    #[instrument(skip_all, fields(run_id = ctx.run_id, url = %state.target))]
    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult> {
        let instruction = state
            .refined_instruction
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| state.effective_query());
        let request = TaskRequest {
            run_id: ctx.run_id,
            instruction,
            target: &state.target,
            step_budget: ctx.config.task.step_budget,
        };

        let automation = ctx.collaborators.automation;
        let outcome = automation.run_task(&request, &mut |step| {
            ctx.report(&ProgressEvent::TaskStep(step.clone()));
        });
        let result = match outcome {
            Ok(result) => {
                info!(ok = result.ok, artifacts = result.artifact_refs.len(), "task finished");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "task failed");
                TaskResult {
                    final_text: format!("Task execution failed: {err:#}"),
                    ok: false,
                    artifact_refs: Vec::new(),
                }
            }
        };

        let step = StepResult::new(result.ok, result.final_text.clone());
        state.task_result = Some(result);
        Ok(step)
    }
}
