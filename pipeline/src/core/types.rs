//! Shared deterministic types for the pipeline core.
//!
//! These types define the contracts between nodes, routers, and the engine.
//! They carry no I/O handles and serialize to a stable JSON shape so they can
//! be embedded in run artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a pipeline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    IntentCheck,
    TargetExistenceCheck,
    CaptureState,
    FeasibilityCheck,
    QueryRefinement,
    ExecuteTask,
}

impl NodeName {
    /// All nodes in pipeline order.
    pub const ALL: [NodeName; 6] = [
        NodeName::IntentCheck,
        NodeName::TargetExistenceCheck,
        NodeName::CaptureState,
        NodeName::FeasibilityCheck,
        NodeName::QueryRefinement,
        NodeName::ExecuteTask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeName::IntentCheck => "intent_check",
            NodeName::TargetExistenceCheck => "target_existence_check",
            NodeName::CaptureState => "capture_state",
            NodeName::FeasibilityCheck => "feasibility_check",
            NodeName::QueryRefinement => "query_refinement",
            NodeName::ExecuteTask => "execute_task",
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing decision taken after a node completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(NodeName),
    Terminal,
}

/// Result reported by the automation collaborator after executing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub final_text: String,
    pub ok: bool,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
}

/// Per-run state threaded through every node.
///
/// Each optional field is owned by exactly one node. A node overwrites its own
/// fields on every execution and only reads fields written by nodes upstream of
/// it in the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub query: String,
    pub target: String,

    pub intent_ok: Option<bool>,
    pub intent_message: Option<String>,
    pub rewritten_query: Option<String>,

    pub target_ok: Option<bool>,
    pub target_message: Option<String>,

    pub capture_ok: Option<bool>,
    pub capture_ref: Option<String>,
    pub capture_message: Option<String>,

    pub feasible: Option<bool>,
    pub feasibility_message: Option<String>,

    pub refined_instruction: Option<String>,
    pub refinement_message: Option<String>,

    pub task_result: Option<TaskResult>,
}

impl RunState {
    pub fn new(query: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    /// The query downstream nodes should act on: the rewritten query when the
    /// intent check produced one, otherwise the original.
    pub fn effective_query(&self) -> &str {
        self.rewritten_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.query)
    }
}

/// Outcome a node reports for the run artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub ok: bool,
    pub message: String,
}

impl StepResult {
    pub fn new(ok: bool, message: impl Into<String>) -> Self {
        Self {
            ok,
            message: message.into(),
        }
    }
}
