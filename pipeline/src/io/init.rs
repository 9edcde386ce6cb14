//! Layout of the `.qa/` workspace directory and its scaffolding.
//!
//! `.qa/schemas/` holds reference copies of the agent output schemas for
//! people writing their own backend or automation. The pipeline never reads
//! them: agents embed their schemas at compile time and each backend request
//! carries its own copy.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::agents::output_schemas;

use super::config::{PipelineConfig, write_config};

/// All canonical paths within `.qa/` for a project root.
#[derive(Debug, Clone)]
pub struct QaPaths {
    pub root: PathBuf,
    pub qa_dir: PathBuf,
    pub config_path: PathBuf,
    pub schemas_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl QaPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let qa_dir = root.join(".qa");
        Self {
            root: root.clone(),
            qa_dir: qa_dir.clone(),
            config_path: qa_dir.join("config.toml"),
            schemas_dir: qa_dir.join("schemas"),
            runs_dir: qa_dir.join("runs"),
            scratch_dir: qa_dir.join("scratch"),
            gitignore_path: qa_dir.join(".gitignore"),
        }
    }

    pub fn schema_path(&self, agent: &str) -> PathBuf {
        self.schemas_dir.join(format!("{agent}.schema.json"))
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing files.
    pub force: bool,
}

/// Create `.qa/` scaffolding in `root`: default config, agent output schemas,
/// and the runs directory.
///
/// Fails if `.qa/config.toml` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<QaPaths> {
    let paths = QaPaths::new(root);
    if paths.qa_dir.exists() && !paths.qa_dir.is_dir() {
        return Err(anyhow!("init: .qa exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    create_dir(&paths.qa_dir)?;
    create_dir(&paths.schemas_dir)?;
    create_dir(&paths.runs_dir)?;

    write_config(&paths.config_path, &PipelineConfig::default())?;
    for (agent, schema) in output_schemas() {
        write_file(&paths.schema_path(agent), schema)?;
    }
    write_file(&paths.gitignore_path, QA_GITIGNORE)?;

    debug!(qa_dir = %paths.qa_dir.display(), "workspace initialized");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const QA_GITIGNORE: &str = "runs/\nscratch/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");

        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.qa_dir.is_dir());
        assert!(paths.runs_dir.is_dir());
        assert!(paths.config_path.is_file());
        for (agent, schema) in output_schemas() {
            assert_eq!(
                fs::read_to_string(paths.schema_path(agent)).expect("read schema"),
                schema,
                "schema copy for {agent}"
            );
        }
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            QA_GITIGNORE
        );
        assert_eq!(
            load_config(&paths.config_path).expect("load"),
            PipelineConfig::default()
        );
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_attempts = 2\n").expect("write custom");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(load_config(&paths.config_path).expect("load").max_attempts, 5);
    }
}
