//! Pipeline configuration stored under `.qa/config.toml`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::message_buffer::TokenEstimator;

use super::write_atomic;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a website QA assistant. You decide whether a request is a functional test of a web page, whether that test can be carried out on what the page shows, and how to phrase it as concrete browser steps. Always answer with JSON that matches the requested schema.";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Pipeline configuration (TOML).
///
/// Missing fields fall back to defaults so a partial file is always valid
/// input to `validate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts per model invocation, including the first.
    pub max_attempts: u32,

    /// Upper bound on node executions in one run.
    pub max_node_executions: usize,

    pub buffer: BufferConfig,
    pub probe: ProbeConfig,
    pub capture: CaptureConfig,
    pub task: TaskConfig,
    pub backend: BackendConfig,
    pub automation: AutomationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_node_executions: 32,
            buffer: BufferConfig::default(),
            probe: ProbeConfig::default(),
            capture: CaptureConfig::default(),
            task: TaskConfig::default(),
            backend: BackendConfig::default(),
            automation: AutomationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BufferConfig {
    pub max_tokens: usize,
    pub chars_per_token: usize,
    /// Flat cost charged for an attached page capture.
    pub image_tokens: usize,
    pub system_prompt: String,
    /// Free-form facts about the task shared with every agent.
    pub task_context: String,
    /// Names of placeholders whose values are withheld from the model.
    pub sensitive_placeholders: Vec<String>,
    /// Files the browser agent may use (e.g. uploads).
    pub available_files: Vec<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            chars_per_token: 3,
            image_tokens: 800,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            task_context: String::new(),
            sensitive_placeholders: Vec::new(),
            available_files: Vec::new(),
        }
    }
}

impl BufferConfig {
    pub fn estimator(&self) -> TokenEstimator {
        TokenEstimator {
            chars_per_token: self.chars_per_token,
            image_tokens: self.image_tokens,
        }
    }

    /// Pinned context text built from the task facts, placeholder names, and
    /// available files. `None` when all three are empty.
    pub fn context_text(&self) -> Option<String> {
        let mut sections = Vec::new();
        let task_context = self.task_context.trim();
        if !task_context.is_empty() {
            sections.push(format!("Task context:\n{task_context}"));
        }
        if !self.sensitive_placeholders.is_empty() {
            sections.push(format!(
                "Sensitive data placeholders (values are withheld, refer to them by name): {}",
                self.sensitive_placeholders.join(", ")
            ));
        }
        if !self.available_files.is_empty() {
            let files: Vec<String> = self
                .available_files
                .iter()
                .map(|path| format!("- {path}"))
                .collect();
            sections.push(format!("Available file paths:\n{}", files.join("\n")));
        }
        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    pub full_page: bool,
    pub scroll_cycles: u32,
    pub scroll_wait_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            full_page: true,
            scroll_cycles: 3,
            scroll_wait_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    /// Maximum browser-agent steps for the final task.
    pub step_budget: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { step_budget: 25 }
    }
}

/// `[backend]`: the model CLI invoked once per attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Program followed by leading arguments (e.g. `["npx","codex"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

/// `[automation]`: the browser-agent command used for captures and tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutomationConfig {
    /// Program followed by leading arguments (e.g. `["npx","qa-browser"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            command: vec!["qa-browser".to_string()],
            timeout_secs: 15 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

fn validate_command(
    section: &str,
    command: &[String],
    timeout_secs: u64,
    output_limit_bytes: usize,
) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{section}.command must be a non-empty array"));
    }
    if timeout_secs == 0 {
        return Err(anyhow!("{section}.timeout_secs must be > 0"));
    }
    if output_limit_bytes == 0 {
        return Err(anyhow!("{section}.output_limit_bytes must be > 0"));
    }
    Ok(())
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.max_node_executions == 0 {
            return Err(anyhow!("max_node_executions must be > 0"));
        }
        if self.buffer.max_tokens == 0 {
            return Err(anyhow!("buffer.max_tokens must be > 0"));
        }
        if self.buffer.chars_per_token == 0 {
            return Err(anyhow!("buffer.chars_per_token must be > 0"));
        }
        if self.buffer.system_prompt.trim().is_empty() {
            return Err(anyhow!("buffer.system_prompt must not be empty"));
        }
        if self.probe.timeout_secs == 0 {
            return Err(anyhow!("probe.timeout_secs must be > 0"));
        }
        if self.task.step_budget == 0 {
            return Err(anyhow!("task.step_budget must be > 0"));
        }
        validate_command(
            "backend",
            &self.backend.command,
            self.backend.timeout_secs,
            self.backend.output_limit_bytes,
        )?;
        validate_command(
            "automation",
            &self.automation.command,
            self.automation.timeout_secs,
            self.automation.output_limit_bytes,
        )?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
