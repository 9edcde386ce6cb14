//! QA task orchestration pipeline CLI.
//!
//! Scaffolds `.qa/` in the current directory, executes pipeline runs against a
//! target page, and probes targets.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qa_pipeline::core::artifact::{RunArtifact, RunOutcome};
use qa_pipeline::engine::StopFlag;
use qa_pipeline::exit_codes;
use qa_pipeline::io::init::{InitOptions, init_workspace};
use qa_pipeline::logging;
use qa_pipeline::run::{RunOptions, execute_run, probe_target};

#[derive(Parser)]
#[command(
    name = "qa-pipeline",
    version,
    about = "Gate, refine, and execute browser QA requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.qa/config.toml` and agent output schemas.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Execute one pipeline run and save its artifact under `.qa/runs/`.
    Run {
        /// Free-text testing request.
        #[arg(short, long)]
        query: String,
        /// URL of the page under test.
        #[arg(short, long)]
        target: String,
        /// Run identifier; generated when omitted.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Check whether the target page is reachable.
    Probe {
        /// URL of the page to probe.
        #[arg(short, long)]
        target: String,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            query,
            target,
            run_id,
        } => cmd_run(
            &root,
            &RunOptions {
                query,
                target,
                run_id,
            },
        ),
        Command::Probe { target } => cmd_probe(&root, &target),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.qa_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, options: &RunOptions) -> Result<i32> {
    let artifact = execute_run(root, options, &StopFlag::new())?;
    println!("{}: {}", artifact.run_id, artifact.summary());
    Ok(run_exit_code(&artifact))
}

fn cmd_probe(root: &Path, target: &str) -> Result<i32> {
    if probe_target(root, target)? {
        println!("reachable: {target}");
        Ok(exit_codes::OK)
    } else {
        println!("unreachable: {target}");
        Ok(exit_codes::HALTED)
    }
}

fn run_exit_code(artifact: &RunArtifact) -> i32 {
    match artifact.outcome {
        RunOutcome::Completed { task_ok: true } => exit_codes::OK,
        RunOutcome::Completed { task_ok: false } => exit_codes::TASK_FAILED,
        RunOutcome::Halted { .. } | RunOutcome::Cancelled { .. } => exit_codes::HALTED,
    }
}
