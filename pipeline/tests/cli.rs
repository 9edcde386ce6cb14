//! CLI tests for `qa-pipeline`.
//!
//! Spawns the binary in a temp directory and verifies files written and exit
//! codes for paths that need no external collaborators.

use std::process::Command;

use qa_pipeline::exit_codes;
use qa_pipeline::io::config::{PipelineConfig, load_config};
use qa_pipeline::io::init::QaPaths;

fn qa_pipeline(dir: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_qa-pipeline"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn qa-pipeline")
}

#[test]
fn init_writes_default_config_and_schemas() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = qa_pipeline(temp.path(), &["init"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let paths = QaPaths::new(temp.path());
    assert_eq!(
        load_config(&paths.config_path).expect("config"),
        PipelineConfig::default()
    );
    assert!(paths.schema_path("query_refinement").is_file());
}

#[test]
fn second_init_without_force_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        qa_pipeline(temp.path(), &["init"]).status.code(),
        Some(exit_codes::OK)
    );

    let out = qa_pipeline(temp.path(), &["init"]);

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
    assert_eq!(
        qa_pipeline(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}

#[test]
fn run_rejects_invalid_run_id() {
    let temp = tempfile::tempdir().expect("tempdir");
    qa_pipeline(temp.path(), &["init"]);

    let out = qa_pipeline(
        temp.path(),
        &[
            "run",
            "--query",
            "Check the submit button",
            "--target",
            "https://a.test",
            "--run-id",
            "../escape",
        ],
    );

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("run id"));
    assert!(!QaPaths::new(temp.path()).runs_dir.join("escape").exists());
}

#[test]
fn run_without_init_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = qa_pipeline(
        temp.path(),
        &["run", "--query", "Check the submit button", "--target", "https://a.test"],
    );

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("qa-pipeline init"));
}

#[test]
fn invalid_config_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    qa_pipeline(temp.path(), &["init"]);
    std::fs::write(QaPaths::new(temp.path()).config_path, "max_attempts = 0\n")
        .expect("write config");

    let out = qa_pipeline(
        temp.path(),
        &["run", "--query", "Check the submit button", "--target", "https://a.test"],
    );

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("max_attempts"));
}

#[test]
fn probe_of_unreachable_target_exits_halted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let out = qa_pipeline(
        temp.path(),
        &["probe", "--target", &format!("http://{addr}/")],
    );

    assert_eq!(out.status.code(), Some(exit_codes::HALTED));
    assert!(String::from_utf8_lossy(&out.stdout).contains("unreachable"));
}
