//! Orchestration for a single pipeline run from the command line.
//!
//! A run is identified by a `run_id` and writes everything it produces under
//! `.qa/runs/<run_id>/`: the attempt log, the page capture, and the final
//! `artifact.json`. The run directory is never reused.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use crate::core::artifact::RunArtifact;
use crate::engine::{RunRequest, StopFlag, WorkflowEngine};
use crate::io::artifact_store::{ArtifactStore, FsArtifactStore};
use crate::io::automation::CommandAutomation;
use crate::io::backend::CodexBackend;
use crate::io::config::load_config;
use crate::io::execution_log::JsonlExecutionLog;
use crate::io::init::QaPaths;
use crate::io::probe::{HttpProbe, TargetProbe};
use crate::nodes::{Collaborators, ProgressEvent};

const RUN_ID_SUFFIX_LEN: usize = 6;

/// Inputs for `qa-pipeline run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub query: String,
    pub target: String,
    /// Generated when absent.
    pub run_id: Option<String>,
}

/// Generate a fresh run id: `run-<utc timestamp>-<random suffix>`.
pub fn generate_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RUN_ID_SUFFIX_LEN)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("run-{stamp}-{suffix}")
}

/// Run ids become directory names, so only `[A-Za-z0-9._-]` is accepted.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("run id must not be '.' or '..'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}

/// Execute one pipeline run in `root` with the bundled collaborators and save
/// its artifact.
///
/// Expects `.qa/` to exist (see `init_workspace`); a missing config file falls
/// back to defaults.
pub fn execute_run(root: &Path, options: &RunOptions, stop: &StopFlag) -> Result<RunArtifact> {
    let paths = QaPaths::new(root);
    if !paths.qa_dir.is_dir() {
        return Err(anyhow!(
            "missing {} (run `qa-pipeline init` first)",
            paths.qa_dir.display()
        ));
    }
    let run_id = match &options.run_id {
        Some(id) => id.clone(),
        None => generate_run_id(),
    };
    validate_run_id(&run_id)?;
    if options.query.trim().is_empty() {
        return Err(anyhow!("query must not be empty"));
    }
    if options.target.trim().is_empty() {
        return Err(anyhow!("target must not be empty"));
    }

    let store = FsArtifactStore::new(&paths.runs_dir);
    if store.path_for(&run_id).exists() {
        return Err(anyhow!("run {run_id} already has an artifact"));
    }

    let config = load_config(&paths.config_path)?;
    let backend = CodexBackend::new(&config.backend, &paths.scratch_dir);
    let automation = CommandAutomation::new(&config.automation, &paths.runs_dir);
    let probe = HttpProbe::new(&config.probe).context("build target probe")?;
    let log = JsonlExecutionLog::new(&paths.runs_dir);
    let engine = WorkflowEngine::qa_pipeline(config)?;

    let request = RunRequest {
        run_id: run_id.clone(),
        query: options.query.clone(),
        target: options.target.clone(),
    };
    let collaborators = Collaborators {
        backend: &backend,
        automation: &automation,
        probe: &probe,
        log: &log,
    };
    let artifact = engine.run(&request, collaborators, stop, &mut log_progress)?;

    store
        .save(&run_id, &artifact)
        .with_context(|| format!("save artifact for run {run_id}"))?;
    info!(run_id = %run_id, path = %store.path_for(&run_id).display(), "artifact saved");
    Ok(artifact)
}

/// Run only the existence probe against `target` using the probe settings in
/// `root`'s config.
pub fn probe_target(root: &Path, target: &str) -> Result<bool> {
    let paths = QaPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let probe = HttpProbe::new(&config.probe).context("build target probe")?;
    Ok(probe.exists(target))
}

fn log_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::NodeStarted { node } => info!(node = %node, "node started"),
        ProgressEvent::NodeFinished { node, ok } => info!(node = %node, ok, "node finished"),
        ProgressEvent::TaskStep(step) => debug!(
            step = step.step,
            url = step.url.as_deref().unwrap_or(""),
            action = step.action.as_deref().unwrap_or(""),
            "task step"
        ),
    }
}
