//! Browser automation collaborator.
//!
//! [`CommandAutomation`] drives an external browser-agent command. The command
//! protocol is two subcommands:
//!
//! - `capture --target URL --out PATH --scroll-cycles N --scroll-wait-ms MS [--full-page]`
//!   writes a screenshot to `PATH` and exits 0.
//! - `run --target URL --max-steps N` reads the instruction on stdin and prints
//!   one JSON object per line: `{"type":"step",...}` per browser step, then a
//!   final `{"type":"result","final_text":...,"ok":...,"artifact_refs":[...]}`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::TaskResult;
use crate::io::config::AutomationConfig;
use crate::io::process::{run_command_with_lines, run_command_with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest<'a> {
    pub run_id: &'a str,
    pub target: &'a str,
    pub full_page: bool,
    pub scroll_cycles: u32,
    pub scroll_wait: Duration,
}

/// A captured page state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Location of the captured image.
    pub reference: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRequest<'a> {
    pub run_id: &'a str,
    pub instruction: &'a str,
    pub target: &'a str,
    pub step_budget: u32,
}

/// Progress snapshot emitted once per automation step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Abstraction over browser automation.
pub trait Automation: Send + Sync {
    fn capture(&self, request: &CaptureRequest<'_>) -> Result<Capture>;

    /// Execute a task. `on_step` is for observability only.
    fn run_task(
        &self,
        request: &TaskRequest<'_>,
        on_step: &mut dyn FnMut(&StepProgress),
    ) -> Result<TaskResult>;
}

/// Automation backed by an external browser-agent command.
#[derive(Debug, Clone)]
pub struct CommandAutomation {
    command: Vec<String>,
    captures_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAutomation {
    /// Captures are written to `<captures_dir>/<run_id>/capture.png`.
    pub fn new(config: &AutomationConfig, captures_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            captures_dir: captures_dir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn command(&self, subcommand: &str) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("automation command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(subcommand);
        Ok(cmd)
    }
}

/// One line of `run` output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunLine {
    Step(StepProgress),
    Result(TaskResult),
}

impl Automation for CommandAutomation {
    #[instrument(skip_all, fields(run_id = request.run_id, url = request.target))]
    fn capture(&self, request: &CaptureRequest<'_>) -> Result<Capture> {
        let out_path = self.captures_dir.join(request.run_id).join("capture.png");
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create capture dir {}", parent.display()))?;
        }

        let mut cmd = self.command("capture")?;
        cmd.arg("--target")
            .arg(request.target)
            .arg("--out")
            .arg(&out_path)
            .arg("--scroll-cycles")
            .arg(request.scroll_cycles.to_string())
            .arg("--scroll-wait-ms")
            .arg(request.scroll_wait.as_millis().to_string());
        if request.full_page {
            cmd.arg("--full-page");
        }

        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .context("run capture command")?;
        if let Some(failure) = output.failure("capture command", self.timeout) {
            return Err(anyhow!(failure));
        }
        if !out_path.is_file() {
            return Err(anyhow!(
                "capture command did not write {}",
                out_path.display()
            ));
        }

        info!(out = %out_path.display(), "page captured");
        Ok(Capture {
            reference: out_path.display().to_string(),
            ok: true,
        })
    }

    #[instrument(skip_all, fields(run_id = request.run_id, step_budget = request.step_budget))]
    fn run_task(
        &self,
        request: &TaskRequest<'_>,
        on_step: &mut dyn FnMut(&StepProgress),
    ) -> Result<TaskResult> {
        let mut cmd = self.command("run")?;
        cmd.arg("--target")
            .arg(request.target)
            .arg("--max-steps")
            .arg(request.step_budget.to_string());

        let mut result = None;
        let output = run_command_with_lines(
            cmd,
            Some(request.instruction.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
            &mut |line| {
                let line = line.trim();
                if line.is_empty() {
                    return;
                }
                match serde_json::from_str::<RunLine>(line) {
                    Ok(RunLine::Step(progress)) => on_step(&progress),
                    Ok(RunLine::Result(task)) => result = Some(task),
                    Err(err) => debug!(err = %err, line, "ignoring non-protocol output line"),
                }
            },
        )
        .context("run task command")?;

        if let Some(failure) = output.failure("task command", self.timeout) {
            warn!(%failure, "task command failed");
            return Err(anyhow!(failure));
        }
        result.ok_or_else(|| anyhow!("task command exited without a result line"))
    }
}
