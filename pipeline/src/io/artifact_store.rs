//! Persistence for run artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::artifact::RunArtifact;

use super::write_json_atomic;

pub trait ArtifactStore: Send + Sync {
    fn save(&self, run_id: &str, artifact: &RunArtifact) -> Result<()>;
}

/// Stores each artifact at `<runs_dir>/<run_id>/artifact.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    runs_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id).join("artifact.json")
    }

    pub fn load(&self, run_id: &str) -> Result<RunArtifact> {
        load_artifact(&self.path_for(run_id))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(&self, run_id: &str, artifact: &RunArtifact) -> Result<()> {
        let path = self.path_for(run_id);
        debug!(path = %path.display(), "saving run artifact");
        write_json_atomic(&path, artifact)
            .with_context(|| format!("save artifact for run {run_id}"))
    }
}

pub fn load_artifact(path: &Path) -> Result<RunArtifact> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse artifact {}", path.display()))
}
