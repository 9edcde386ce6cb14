//! Append-only execution log of model invocation attempts.
//!
//! This is product output, separate from `tracing`: every attempt is recorded
//! regardless of `RUST_LOG`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One model invocation attempt. Exactly one of `output` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: String,
    pub agent_name: String,
    /// 1-indexed.
    pub attempt_number: u32,
    /// RFC 3339 timestamp (UTC).
    pub started_at: String,
    pub duration_ms: u64,
    pub input: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

pub trait ExecutionLog: Send + Sync {
    fn append(&self, record: &AttemptRecord) -> Result<()>;
}

/// JSONL log written to `<runs_dir>/<run_id>/attempts.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlExecutionLog {
    runs_dir: PathBuf,
}

impl JsonlExecutionLog {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id).join("attempts.jsonl")
    }
}

impl ExecutionLog for JsonlExecutionLog {
    fn append(&self, record: &AttemptRecord) -> Result<()> {
        let path = self.path_for(&record.run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("serialize attempt record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open execution log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append execution log {}", path.display()))
    }
}

/// Read every record from a JSONL execution log.
pub fn read_jsonl(path: &Path) -> Result<Vec<AttemptRecord>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

/// In-process log.
#[derive(Debug, Default)]
pub struct MemoryExecutionLog {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_for(&self, run_id: &str) -> Vec<AttemptRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.run_id == run_id)
            .collect()
    }
}

impl ExecutionLog for MemoryExecutionLog {
    fn append(&self, record: &AttemptRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("execution log lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
