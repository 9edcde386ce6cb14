//! Model backend abstraction.
//!
//! The [`ModelBackend`] trait decouples agent invocation from the concrete
//! model (currently `codex exec`). Tests use scripted backends that return
//! predetermined JSON without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::message_buffer::MessageEntry;
use crate::io::config::BackendConfig;
use crate::io::process::run_command_with_timeout;

/// One structured-output request to a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    /// Name of the agent issuing the request.
    pub agent: &'a str,
    /// Conversation so far, oldest first; the last entry is the current turn.
    pub messages: &'a [MessageEntry],
    /// JSON Schema the reply must conform to.
    pub schema: &'a Value,
}

impl ModelRequest<'_> {
    /// Flatten the conversation for backends that only accept one text prompt.
    pub fn prompt_text(&self) -> String {
        let mut buf = String::new();
        for entry in self.messages {
            buf.push_str("## ");
            buf.push_str(entry.role.as_str());
            buf.push_str("\n\n");
            buf.push_str(entry.content.trim_end());
            if let Some(attachment) = &entry.attachment {
                buf.push_str("\n\n[attached image: ");
                buf.push_str(attachment);
                buf.push(']');
            }
            buf.push_str("\n\n");
        }
        buf
    }

    /// Image references attached anywhere in the conversation, deduplicated.
    pub fn attachments(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        for attachment in self.messages.iter().filter_map(|e| e.attachment.as_deref()) {
            if !refs.contains(&attachment) {
                refs.push(attachment);
            }
        }
        refs
    }
}

/// Abstraction over model backends.
pub trait ModelBackend: Send + Sync {
    /// Return the model's JSON reply. Errors are treated as transient by callers.
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Value>;
}

/// Backend that spawns `codex exec` with an output schema.
#[derive(Debug, Clone)]
pub struct CodexBackend {
    command: Vec<String>,
    scratch_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CodexBackend {
    /// `scratch_dir` holds the per-request schema and reply files.
    pub fn new(config: &BackendConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            scratch_dir: scratch_dir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn exec(&self, request: &ModelRequest<'_>, dir: &Path) -> Result<Value> {
        let schema_path = dir.join("schema.json");
        let output_path = dir.join("output.json");
        let schema = serde_json::to_string_pretty(request.schema).context("serialize schema")?;
        fs::write(&schema_path, schema)
            .with_context(|| format!("write schema {}", schema_path.display()))?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("exec")
            .arg("--sandbox")
            .arg("read-only")
            // Scratch directories are not git repositories.
            .arg("--skip-git-repo-check");
        for image in request.attachments() {
            cmd.arg("--image").arg(image);
        }
        cmd.arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(dir);

        let prompt = request.prompt_text();
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run codex exec")?;

        if let Some(failure) = output.failure("codex exec", self.timeout) {
            warn!(agent = request.agent, %failure, "codex exec failed");
            return Err(anyhow!(failure));
        }

        let contents = fs::read_to_string(&output_path)
            .with_context(|| format!("read codex output {}", output_path.display()))?;
        parse_reply(&contents)
    }
}

impl ModelBackend for CodexBackend {
    #[instrument(skip_all, fields(agent = request.agent, timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Value> {
        let suffix: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let dir = self.scratch_dir.join(format!("{}-{suffix}", request.agent));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create scratch dir {}", dir.display()))?;
        info!(dir = %dir.display(), "starting codex exec");

        let result = self.exec(request, &dir);
        if let Err(err) = fs::remove_dir_all(&dir) {
            debug!(err = %err, dir = %dir.display(), "failed to remove scratch dir");
        }
        result
    }
}

/// Parse a model reply as JSON, tolerating a surrounding Markdown code fence.
pub fn parse_reply(raw: &str) -> Result<Value> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fence regex should be valid")
    });

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("model reply was empty"));
    }
    let body = FENCE_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());
    serde_json::from_str(body).context("parse model reply as json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message_buffer::{EntryKind, Role};
    use serde_json::json;

    fn entry(role: Role, content: &str, attachment: Option<&str>) -> MessageEntry {
        MessageEntry {
            role,
            kind: EntryKind::State,
            content: content.to_string(),
            token_cost: 1,
            pinned: false,
            attachment: attachment.map(str::to_string),
        }
    }

    #[test]
    fn prompt_text_flattens_roles_in_order() {
        let messages = vec![
            entry(Role::System, "be precise", None),
            entry(Role::User, "is this QA?", Some("runs/r/capture.png")),
        ];
        let schema = json!({"type": "object"});
        let request = ModelRequest {
            agent: "intent_check",
            messages: &messages,
            schema: &schema,
        };

        let text = request.prompt_text();
        let system_at = text.find("## system").expect("system");
        let user_at = text.find("## user").expect("user");
        assert!(system_at < user_at);
        assert!(text.contains("[attached image: runs/r/capture.png]"));
    }

    #[test]
    fn attachments_are_deduplicated() {
        let messages = vec![
            entry(Role::User, "a", Some("cap.png")),
            entry(Role::User, "b", Some("cap.png")),
            entry(Role::User, "c", None),
        ];
        let schema = json!({});
        let request = ModelRequest {
            agent: "feasibility_check",
            messages: &messages,
            schema: &schema,
        };
        assert_eq!(request.attachments(), vec!["cap.png"]);
    }

    #[test]
    fn parse_reply_accepts_plain_and_fenced_json() {
        assert_eq!(
            parse_reply("{\"intent\": true}").expect("plain"),
            json!({"intent": true})
        );
        assert_eq!(
            parse_reply("Here you go:\n```json\n{\"intent\": false}\n```\n").expect("fenced"),
            json!({"intent": false})
        );
    }

    #[test]
    fn parse_reply_rejects_empty_and_prose() {
        assert!(parse_reply("  ").is_err());
        assert!(parse_reply("I think the answer is yes").is_err());
    }
}
