//! Run artifact: the immutable record of one pipeline run.

use serde::{Deserialize, Serialize};

use super::types::{NodeName, RunState, StepResult, TaskResult};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The task was handed to the automation collaborator.
    Completed { task_ok: bool },
    /// A gate closed before the task could run.
    Halted { node: NodeName, reason: String },
    /// The stop flag was raised between nodes.
    Cancelled { after: Option<NodeName> },
}

/// One executed node with the state it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub node: NodeName,
    pub action: String,
    pub result: StepResult,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub query: String,
    pub target: String,
    /// RFC 3339 timestamp (UTC).
    pub started_at: String,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<TaskResult>,
}

impl RunArtifact {
    pub fn final_state(&self) -> Option<&RunState> {
        self.steps.last().map(|step| &step.state)
    }

    pub fn visited(&self) -> Vec<NodeName> {
        self.steps.iter().map(|step| step.node).collect()
    }

    /// One-line human summary of the outcome.
    pub fn summary(&self) -> String {
        match &self.outcome {
            RunOutcome::Completed { task_ok } => {
                let text = self
                    .final_result
                    .as_ref()
                    .map(|r| r.final_text.trim())
                    .unwrap_or_default();
                let label = if *task_ok { "task succeeded" } else { "task failed" };
                if text.is_empty() {
                    label.to_string()
                } else {
                    format!("{label}: {text}")
                }
            }
            RunOutcome::Halted { node, reason } => format!("halted at {node}: {reason}"),
            RunOutcome::Cancelled { after: Some(node) } => format!("cancelled after {node}"),
            RunOutcome::Cancelled { after: None } => "cancelled before the first node".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(outcome: RunOutcome) -> RunArtifact {
        RunArtifact {
            run_id: "run-1".to_string(),
            query: "q".to_string(),
            target: "https://a.test".to_string(),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            duration_ms: 5,
            outcome,
            steps: Vec::new(),
            final_result: None,
        }
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RunOutcome::Halted {
            node: NodeName::TargetExistenceCheck,
            reason: "Webpage does not exist or is invalid".to_string(),
        })
        .expect("serialize");
        assert_eq!(json["status"], "halted");
        assert_eq!(json["node"], "target_existence_check");
    }

    #[test]
    fn summary_reports_gate_reason() {
        let halted = artifact(RunOutcome::Halted {
            node: NodeName::IntentCheck,
            reason: "not a QA request".to_string(),
        });
        assert_eq!(halted.summary(), "halted at intent_check: not a QA request");

        let cancelled = artifact(RunOutcome::Cancelled { after: None });
        assert_eq!(cancelled.summary(), "cancelled before the first node");
    }

    #[test]
    fn summary_includes_final_text() {
        let mut done = artifact(RunOutcome::Completed { task_ok: true });
        done.final_result = Some(TaskResult {
            final_text: "submit button works".to_string(),
            ok: true,
            artifact_refs: Vec::new(),
        });
        assert_eq!(done.summary(), "task succeeded: submit button works");
    }
}
