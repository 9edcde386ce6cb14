//! Pipeline nodes.
//!
//! A node performs exactly one model invocation or one collaborator call,
//! writes only the [`RunState`] fields it owns, and reports a [`StepResult`].
//! Collaborator failures become gate results here; only configuration errors
//! propagate as `Err`.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::agents::Agent;
use crate::agents::invoker::{InvokeError, Invocation, InvokeScope, ModelInvoker};
use crate::core::message_buffer::MessageBuffer;
use crate::core::types::{NodeName, RunState, StepResult};
use crate::io::automation::{Automation, StepProgress};
use crate::io::backend::ModelBackend;
use crate::io::config::PipelineConfig;
use crate::io::execution_log::ExecutionLog;
use crate::io::probe::TargetProbe;

mod capture;
mod execute;
mod feasibility;
mod intent;
mod refinement;
mod target;

pub use capture::CaptureState;
pub use execute::ExecuteTask;
pub use feasibility::FeasibilityCheck;
pub use intent::IntentCheck;
pub use refinement::QueryRefinement;
pub use target::TargetExistenceCheck;

/// External collaborators lent to a run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub backend: &'a dyn ModelBackend,
    pub automation: &'a dyn Automation,
    pub probe: &'a dyn TargetProbe,
    pub log: &'a dyn ExecutionLog,
}

/// Observability events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    NodeStarted { node: NodeName },
    NodeFinished { node: NodeName, ok: bool },
    TaskStep(StepProgress),
}

/// Per-run context handed to each node.
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub collaborators: Collaborators<'a>,
    pub config: &'a PipelineConfig,
    pub buffer: MessageBuffer,
    invoker: &'a ModelInvoker,
    progress: &'a mut dyn FnMut(&ProgressEvent),
}

impl<'a> RunContext<'a> {
    pub fn new(
        run_id: &'a str,
        collaborators: Collaborators<'a>,
        config: &'a PipelineConfig,
        buffer: MessageBuffer,
        invoker: &'a ModelInvoker,
        progress: &'a mut dyn FnMut(&ProgressEvent),
    ) -> Self {
        Self {
            run_id,
            collaborators,
            config,
            buffer,
            invoker,
            progress,
        }
    }

    pub fn report(&mut self, event: &ProgressEvent) {
        (self.progress)(event);
    }

    /// Invoke agent `A` through the run's buffer and collaborators.
    pub fn invoke<A: Agent>(
        &mut self,
        inputs: &BTreeMap<String, String>,
        attachment: Option<&str>,
    ) -> Result<Invocation<A::Output>, InvokeError> {
        let scope = InvokeScope {
            run_id: self.run_id,
            backend: self.collaborators.backend,
            log: self.collaborators.log,
            buffer: &mut self.buffer,
        };
        self.invoker.invoke::<A>(scope, inputs, attachment)
    }
}

/// One unit of pipeline work. Nodes hold no per-run state.
pub trait Node: Send + Sync {
    fn name(&self) -> NodeName;

    /// Short label for the side effect, recorded in the run artifact.
    fn action(&self) -> &'static str;

    fn execute(&self, state: &mut RunState, ctx: &mut RunContext<'_>) -> Result<StepResult>;
}

/// Nodes keyed by name.
#[derive(Default)]
pub struct NodeTable {
    nodes: BTreeMap<NodeName, Box<dyn Node>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six QA pipeline nodes.
    pub fn qa_pipeline() -> Self {
        let mut table = Self::new();
        table.register(Box::new(IntentCheck));
        table.register(Box::new(TargetExistenceCheck));
        table.register(Box::new(CaptureState));
        table.register(Box::new(FeasibilityCheck));
        table.register(Box::new(QueryRefinement));
        table.register(Box::new(ExecuteTask));
        table
    }

    /// Register `node` under its own name, replacing any previous entry.
    pub fn register(&mut self, node: Box<dyn Node>) {
        self.nodes.insert(node.name(), node);
    }

    pub fn remove(&mut self, name: NodeName) -> Option<Box<dyn Node>> {
        self.nodes.remove(&name)
    }

    pub fn get(&self, name: NodeName) -> Option<&dyn Node> {
        self.nodes.get(&name).map(|node| node.as_ref())
    }
}

/// Input map for agent templates.
pub(crate) fn inputs<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Trimmed `Some` for non-blank text.
pub(crate) fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
