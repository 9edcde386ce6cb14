//! Investigation tests for the Codex-backed model backend.
//!
//! They require the Codex CLI on `PATH` with valid credentials.

use std::process::Command;

use qa_pipeline::agents::output_schemas;
use qa_pipeline::core::artifact::RunOutcome;
use qa_pipeline::core::message_buffer::{EntryKind, MessageBuffer, Role};
use qa_pipeline::core::types::NodeName;
use qa_pipeline::engine::{RunRequest, StopFlag, WorkflowEngine};
use qa_pipeline::io::backend::{CodexBackend, ModelBackend, ModelRequest};
use qa_pipeline::io::config::PipelineConfig;
use qa_pipeline::io::execution_log::MemoryExecutionLog;
use qa_pipeline::nodes::Collaborators;
use qa_pipeline::test_support::{ScriptedAutomation, ScriptedProbe};
use serde_json::Value;
use tempfile::tempdir;

fn intent_schema() -> Value {
    let (_, raw) = output_schemas()
        .into_iter()
        .find(|(agent, _)| *agent == "intent_check")
        .expect("intent schema");
    serde_json::from_str(raw).expect("parse schema")
}

/// Verifies that the Codex CLI is available in PATH.
#[test]
#[ignore]
fn codex_cli_available() {
    let output = Command::new("codex")
        .arg("--version")
        .output()
        .expect("codex not in PATH");

    assert!(
        output.status.success(),
        "codex --version failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A single structured completion comes back matching the intent schema.
#[test]
#[ignore]
fn codex_backend_returns_schema_shaped_reply() {
    let scratch = tempdir().expect("tempdir");
    let config = PipelineConfig::default();
    let backend = CodexBackend::new(&config.backend, scratch.path());
    let schema = intent_schema();

    let mut buffer = MessageBuffer::initialize(
        &config.buffer.system_prompt,
        None,
        &config.buffer.estimator(),
    );
    buffer.append(
        Role::User,
        EntryKind::State,
        "Classify this request: \"Check that the login form rejects an empty password\". \
         Reply with intent=true, a short agent_msg, and an empty modified_prompt.",
        0,
    );

    let reply = backend
        .complete(&ModelRequest {
            agent: "intent_check",
            messages: buffer.entries(),
            schema: &schema,
        })
        .expect("codex reply");

    assert_eq!(reply["intent"], Value::Bool(true));
    assert!(reply["agent_msg"].is_string());
}

/// An out-of-domain request is stopped at the intent gate by a real model.
#[test]
#[ignore]
fn codex_rejects_out_of_domain_request() {
    let scratch = tempdir().expect("tempdir");
    let config = PipelineConfig::default();
    let backend = CodexBackend::new(&config.backend, scratch.path());
    let automation = ScriptedAutomation::new();
    let probe = ScriptedProbe::new(true);
    let log = MemoryExecutionLog::new();
    let engine = WorkflowEngine::qa_pipeline(config).expect("engine");

    let artifact = engine
        .run(
            &RunRequest {
                run_id: "investigation".to_string(),
                query: "Write me a poem about autumn leaves".to_string(),
                target: "https://example.com".to_string(),
            },
            Collaborators {
                backend: &backend,
                automation: &automation,
                probe: &probe,
                log: &log,
            },
            &StopFlag::new(),
            &mut |_| {},
        )
        .expect("run");

    assert_eq!(artifact.visited(), vec![NodeName::IntentCheck]);
    assert!(matches!(artifact.outcome, RunOutcome::Halted { .. }));
    println!("intent message: {}", artifact.summary());
}
