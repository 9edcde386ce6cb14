//! Workflow engine: drives nodes and routers from the start node to terminal.
//!
//! The engine holds only immutable tables and settings, so one engine can
//! serve concurrent runs. All per-run state (the [`RunState`], the message
//! buffer, the step records) lives on the stack of [`WorkflowEngine::run`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::agents::invoker::ModelInvoker;
use crate::core::artifact::{RunArtifact, RunOutcome, StepRecord};
use crate::core::message_buffer::MessageBuffer;
use crate::core::router::RouterTable;
use crate::core::types::{Next, NodeName, RunState, StepResult};
use crate::io::config::PipelineConfig;
use crate::nodes::{Collaborators, NodeTable, ProgressEvent, RunContext};

/// Defects in how the node and router tables are wired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WiringError {
    #[error("node {0} is not registered")]
    MissingNode(NodeName),
    #[error("no router registered after node {0}")]
    MissingRouter(NodeName),
    #[error("run exceeded {limit} node executions")]
    StepLimit { limit: usize },
}

/// Cooperative cancellation flag, checked between nodes.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    pub query: String,
    pub target: String,
}

pub struct WorkflowEngine {
    nodes: NodeTable,
    routers: RouterTable,
    start: NodeName,
    config: PipelineConfig,
    invoker: ModelInvoker,
}

impl WorkflowEngine {
    /// Build an engine over explicit tables. Fails on invalid configuration.
    pub fn new(
        nodes: NodeTable,
        routers: RouterTable,
        start: NodeName,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline config")?;
        let invoker = ModelInvoker::new(
            config.max_attempts,
            config.buffer.max_tokens,
            config.buffer.estimator(),
        )?;
        Ok(Self {
            nodes,
            routers,
            start,
            config,
            invoker,
        })
    }

    /// The QA pipeline starting at the intent check.
    pub fn qa_pipeline(config: PipelineConfig) -> Result<Self> {
        Self::new(
            NodeTable::qa_pipeline(),
            RouterTable::qa_pipeline(),
            NodeName::IntentCheck,
            config,
        )
    }

    /// Execute one run to terminal and return its artifact.
    ///
    /// Gate failures, collaborator failures, and cancellation all end in an
    /// artifact. Only configuration errors and wiring defects return `Err`.
    #[instrument(skip_all, fields(run_id = %request.run_id))]
    pub fn run(
        &self,
        request: &RunRequest,
        collaborators: Collaborators<'_>,
        stop: &StopFlag,
        progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<RunArtifact> {
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        info!(url = %request.target, "run started");

        let context_text = self.config.buffer.context_text();
        let mut buffer = MessageBuffer::initialize(
            &self.config.buffer.system_prompt,
            context_text.as_deref(),
            &self.config.buffer.estimator(),
        );
        buffer
            .enforce_budget(self.config.buffer.max_tokens)
            .context("initialize message buffer")?;

        let mut ctx = RunContext::new(
            &request.run_id,
            collaborators,
            &self.config,
            buffer,
            &self.invoker,
            progress,
        );
        let mut state = RunState::new(&request.query, &request.target);
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current = self.start;

        let outcome = loop {
            if stop.is_stopped() {
                info!(after = ?steps.last().map(|s| s.node), "run cancelled");
                break RunOutcome::Cancelled {
                    after: steps.last().map(|step| step.node),
                };
            }
            if steps.len() >= self.config.max_node_executions {
                return Err(WiringError::StepLimit {
                    limit: self.config.max_node_executions,
                }
                .into());
            }
            let node = self
                .nodes
                .get(current)
                .ok_or(WiringError::MissingNode(current))?;
            let router = self
                .routers
                .get(current)
                .ok_or(WiringError::MissingRouter(current))?;

            ctx.report(&ProgressEvent::NodeStarted { node: current });
            let result = node
                .execute(&mut state, &mut ctx)
                .with_context(|| format!("execute node {current}"))?;
            debug!(node = %current, ok = result.ok, message = %result.message, "node finished");
            ctx.report(&ProgressEvent::NodeFinished {
                node: current,
                ok: result.ok,
            });

            steps.push(StepRecord {
                index: steps.len(),
                node: current,
                action: node.action().to_string(),
                result: result.clone(),
                state: state.clone(),
            });

            match router(&state) {
                Next::Node(next) => current = next,
                Next::Terminal => break terminal_outcome(&state, current, &result),
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(steps = steps.len(), duration_ms, outcome = ?outcome, "run finished");
        Ok(RunArtifact {
            run_id: request.run_id.clone(),
            query: request.query.clone(),
            target: request.target.clone(),
            started_at,
            duration_ms,
            outcome,
            steps,
            final_result: state.task_result,
        })
    }
}

fn terminal_outcome(state: &RunState, last: NodeName, result: &StepResult) -> RunOutcome {
    match &state.task_result {
        Some(task) => RunOutcome::Completed { task_ok: task.ok },
        None => RunOutcome::Halted {
            node: last,
            reason: result.message.clone(),
        },
    }
}
