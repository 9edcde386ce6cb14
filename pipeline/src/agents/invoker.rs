//! Bounded-retry invocation of a structured-output agent.
//!
//! One call to [`ModelInvoker::invoke`] renders the agent's template, appends
//! the rendered turn to the run's message buffer, and asks the backend for a
//! reply that validates against the agent's schema. A failed attempt is rolled
//! back out of the buffer and retried immediately with the latest error
//! appended to the prompt. Every attempt is written to the execution log.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, bail};
use chrono::{SecondsFormat, Utc};
use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::message_buffer::{BudgetError, EntryKind, MessageBuffer, Role, TokenEstimator};
use crate::core::prompt::{ERROR_NOTE_MARKER, render_prompt};
use crate::io::backend::{ModelBackend, ModelRequest};
use crate::io::execution_log::{AttemptRecord, ExecutionLog};

use super::Agent;

/// Invocation failures that are never retried.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("max_attempts must be at least 1 (got {0})")]
    InvalidMaxAttempts(u32),

    #[error("render prompt for agent {agent}")]
    Render {
        agent: &'static str,
        #[source]
        source: minijinja::Error,
    },

    #[error("invalid output schema for agent {agent}: {message}")]
    Schema {
        agent: &'static str,
        message: String,
    },

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("prompt for agent {agent} needs {tokens} tokens on top of pinned context; budget is {max_tokens}")]
    TurnTooLarge {
        agent: &'static str,
        tokens: usize,
        max_tokens: usize,
    },

    #[error("append attempt record for agent {agent}")]
    Log {
        agent: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Result of an invocation. `succeeded == false` means `output` is the
/// agent's exhausted value, not a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<T> {
    pub output: T,
    pub attempts: u32,
    pub succeeded: bool,
}

/// Per-run collaborators an invocation writes through.
pub struct InvokeScope<'a> {
    pub run_id: &'a str,
    pub backend: &'a dyn ModelBackend,
    pub log: &'a dyn ExecutionLog,
    pub buffer: &'a mut MessageBuffer,
}

#[derive(Debug, Clone)]
pub struct ModelInvoker {
    max_attempts: u32,
    max_tokens: usize,
    estimator: TokenEstimator,
}

impl ModelInvoker {
    pub fn new(
        max_attempts: u32,
        max_tokens: usize,
        estimator: TokenEstimator,
    ) -> Result<Self, InvokeError> {
        if max_attempts < 1 {
            return Err(InvokeError::InvalidMaxAttempts(max_attempts));
        }
        Ok(Self {
            max_attempts,
            max_tokens,
            estimator,
        })
    }

    /// Longest prefix of `note` that keeps the retried turn within
    /// `available` tokens. `None` when not even one character fits.
    fn fit_error_note<'n>(
        &self,
        bare: &str,
        note: &'n str,
        has_attachment: bool,
        available: usize,
    ) -> Option<&'n str> {
        let image = if has_attachment {
            self.estimator.image_tokens
        } else {
            0
        };
        let max_chars = available
            .saturating_sub(image)
            .saturating_mul(self.estimator.chars_per_token.max(1));
        // "\n\n" + marker + " " precede the note.
        let overhead = bare.chars().count() + ERROR_NOTE_MARKER.chars().count() + 3;
        let room = max_chars.checked_sub(overhead).filter(|room| *room > 0)?;
        let note = note.trim();
        let fitted = match note.char_indices().nth(room) {
            Some((end, _)) => &note[..end],
            None => note,
        };
        (!fitted.trim().is_empty()).then_some(fitted)
    }

    /// Run agent `A` with `inputs`, optionally attaching an image to the turn.
    #[instrument(skip_all, fields(agent = A::NAME, run_id = scope.run_id))]
    pub fn invoke<A: Agent>(
        &self,
        scope: InvokeScope<'_>,
        inputs: &BTreeMap<String, String>,
        attachment: Option<&str>,
    ) -> Result<Invocation<A::Output>, InvokeError> {
        let InvokeScope {
            run_id,
            backend,
            log,
            buffer,
        } = scope;
        let (schema, validator) = compile_schema(A::NAME, A::SCHEMA)?;

        let bare = render_prompt(A::NAME, A::TEMPLATE, inputs, None).map_err(|source| {
            InvokeError::Render {
                agent: A::NAME,
                source,
            }
        })?;
        buffer.enforce_budget(self.max_tokens)?;
        let available = self.max_tokens.saturating_sub(buffer.pinned_tokens());
        let bare_cost = self.estimator.estimate(&bare, attachment.is_some());
        if bare_cost > available {
            return Err(InvokeError::TurnTooLarge {
                agent: A::NAME,
                tokens: bare_cost,
                max_tokens: self.max_tokens,
            });
        }

        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let started = Instant::now();
            let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

            let note = last_error
                .as_deref()
                .and_then(|note| self.fit_error_note(&bare, note, attachment.is_some(), available));
            let prompt = match note {
                Some(note) => render_prompt(A::NAME, A::TEMPLATE, inputs, Some(note)).map_err(
                    |source| InvokeError::Render {
                        agent: A::NAME,
                        source,
                    },
                )?,
                None => bare.clone(),
            };
            let cost = self.estimator.estimate(&prompt, attachment.is_some());
            match attachment {
                Some(image) => {
                    buffer.append_with_attachment(Role::User, EntryKind::State, prompt, image, cost);
                }
                None => buffer.append(Role::User, EntryKind::State, prompt, cost),
            }
            buffer.enforce_budget(self.max_tokens)?;

            let request = ModelRequest {
                agent: A::NAME,
                messages: buffer.entries(),
                schema: &schema,
            };
            let reply = backend
                .complete(&request)
                .and_then(|value| parse_reply::<A::Output>(&validator, value));
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let mut record = AttemptRecord {
                run_id: run_id.to_string(),
                agent_name: A::NAME.to_string(),
                attempt_number: attempt,
                started_at,
                duration_ms,
                input: inputs.clone(),
                output: None,
                error: None,
            };

            match reply {
                Ok((raw, output)) => {
                    record.output = Some(raw.clone());
                    append_record(log, A::NAME, &record)?;
                    let text = raw.to_string();
                    let reply_cost = self.estimator.estimate(&text, false);
                    buffer.append(Role::Assistant, EntryKind::Reply, text, reply_cost);
                    buffer.enforce_budget(self.max_tokens)?;
                    info!(attempt, duration_ms, "agent replied");
                    return Ok(Invocation {
                        output,
                        attempts: attempt,
                        succeeded: true,
                    });
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(attempt, max_attempts = self.max_attempts, error = %message, "agent attempt failed");
                    record.error = Some(message.clone());
                    append_record(log, A::NAME, &record)?;
                    let removed = buffer.remove_last_state_turns(1);
                    debug!(removed, "rolled back failed turn");
                    last_error = Some(message);
                }
            }
        }

        let reason = last_error.unwrap_or_else(|| "no attempts were made".to_string());
        warn!(attempts = self.max_attempts, "agent exhausted its attempts");
        Ok(Invocation {
            output: A::exhausted(&reason),
            attempts: self.max_attempts,
            succeeded: false,
        })
    }
}

fn compile_schema(agent: &'static str, raw: &str) -> Result<(Value, Validator), InvokeError> {
    let schema: Value = serde_json::from_str(raw).map_err(|err| InvokeError::Schema {
        agent,
        message: err.to_string(),
    })?;
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| InvokeError::Schema {
            agent,
            message: err.to_string(),
        })?;
    Ok((schema, validator))
}

/// Validate `value` against the schema, then deserialize it.
fn parse_reply<T: DeserializeOwned>(validator: &Validator, value: Value) -> anyhow::Result<(Value, T)> {
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !errors.is_empty() {
        bail!("reply does not match schema:\n- {}", errors.join("\n- "));
    }
    let parsed = serde_json::from_value(value.clone()).context("deserialize reply")?;
    Ok((value, parsed))
}

fn append_record(
    log: &dyn ExecutionLog,
    agent: &'static str,
    record: &AttemptRecord,
) -> Result<(), InvokeError> {
    log.append(record).map_err(|err| InvokeError::Log {
        agent,
        source: err.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::execution_log::MemoryExecutionLog;
    use crate::test_support::ScriptedBackend;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Echo {
        word: String,
    }

    struct EchoAgent;

    impl Agent for EchoAgent {
        type Output = Echo;
        const NAME: &'static str = "echo";
        const TEMPLATE: &'static str = "Say {{ word }}";
        const SCHEMA: &'static str = r#"{
            "type": "object",
            "required": ["word"],
            "properties": {"word": {"type": "string"}}
        }"#;

        fn exhausted(reason: &str) -> Echo {
            Echo {
                word: format!("exhausted: {reason}"),
            }
        }
    }

    struct FailingLog;

    impl ExecutionLog for FailingLog {
        fn append(&self, _record: &AttemptRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn inputs() -> BTreeMap<String, String> {
        BTreeMap::from([("word".to_string(), "hello".to_string())])
    }

    fn buffer() -> MessageBuffer {
        MessageBuffer::initialize("system", None, &TokenEstimator::default())
    }

    fn invoker(max_attempts: u32) -> ModelInvoker {
        ModelInvoker::new(max_attempts, 10_000, TokenEstimator::default()).expect("invoker")
    }

    #[test]
    fn first_attempt_success_records_once() {
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "hello"}));
        let log = MemoryExecutionLog::new();
        let mut buffer = buffer();

        let got = invoker(5)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect("invoke");

        assert!(got.succeeded);
        assert_eq!(got.attempts, 1);
        assert_eq!(got.output.word, "hello");
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].succeeded());
        assert_eq!(records[0].input["word"], "hello");
        let kinds: Vec<EntryKind> = buffer.entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Instruction, EntryKind::State, EntryKind::Reply]
        );
    }

    #[test]
    fn retries_roll_back_and_carry_only_latest_error() {
        let backend = ScriptedBackend::new()
            .fail("echo", "first failure")
            .reply("echo", json!({"wrong": 1}))
            .reply("echo", json!({"word": "hello"}));
        let log = MemoryExecutionLog::new();
        let mut buffer = buffer();

        let got = invoker(5)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect("invoke");

        assert!(got.succeeded);
        assert_eq!(got.attempts, 3);

        let records = log.records();
        let numbers: Vec<u32> = records.iter().map(|r| r.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(records[0].error.as_deref().is_some_and(|e| e.contains("first failure")));
        assert!(records[1].error.as_deref().is_some_and(|e| e.contains("does not match schema")));
        assert!(records[2].succeeded());

        let prompts = backend.prompts("echo");
        assert_eq!(prompts[0], "Say hello");
        assert!(prompts[1].ends_with("[ERROR MESSAGE FOR AGENT CONTEXT]: first failure"));
        assert!(prompts[2].contains("does not match schema"));
        assert!(!prompts[2].contains("first failure"));

        let states = buffer
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::State)
            .count();
        assert_eq!(states, 1);
        assert_eq!(
            buffer.current_tokens(),
            buffer.entries().iter().map(|e| e.token_cost).sum::<usize>()
        );
    }

    #[test]
    fn exhaustion_returns_failure_flagged_output() {
        let backend = ScriptedBackend::new()
            .fail("echo", "down")
            .fail("echo", "still down");
        let log = MemoryExecutionLog::new();
        let mut buffer = buffer();

        let got = invoker(2)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect("invoke");

        assert!(!got.succeeded);
        assert_eq!(got.attempts, 2);
        assert_eq!(got.output.word, "exhausted: still down");
        assert_eq!(log.records().len(), 2);
        assert_eq!(backend.calls("echo"), 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn zero_attempts_rejected_at_construction() {
        let err = ModelInvoker::new(0, 100, TokenEstimator::default()).expect_err("invalid");
        assert!(matches!(err, InvokeError::InvalidMaxAttempts(0)));
    }

    #[test]
    fn unresolved_placeholder_is_fatal_without_calling_backend() {
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "x"}));
        let log = MemoryExecutionLog::new();
        let mut buffer = buffer();

        let err = invoker(5)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &BTreeMap::new(),
                None,
            )
            .expect_err("render fails");

        assert!(matches!(err, InvokeError::Render { agent: "echo", .. }));
        assert_eq!(backend.calls("echo"), 0);
        assert!(log.records().is_empty());
    }

    #[test]
    fn pinned_overflow_is_fatal() {
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "x"}));
        let log = MemoryExecutionLog::new();
        let mut buffer = MessageBuffer::initialize(
            &"long system prompt ".repeat(20),
            None,
            &TokenEstimator::default(),
        );

        let err = ModelInvoker::new(3, 10, TokenEstimator::default())
            .expect("invoker")
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect_err("over budget");

        assert!(matches!(err, InvokeError::Budget(BudgetError::PinnedOverflow { .. })));
        assert_eq!(backend.calls("echo"), 0);
    }

    #[test]
    fn long_error_note_is_trimmed_to_fit_budget() {
        let estimator = TokenEstimator::default();
        let mut buffer = buffer();
        // Room for the bare turn plus 50 tokens.
        let max_tokens = buffer.pinned_tokens() + estimator.estimate("Say hello", false) + 50;
        let backend = ScriptedBackend::new()
            .fail("echo", &"x".repeat(1000))
            .reply("echo", json!({"word": "hello"}));
        let log = MemoryExecutionLog::new();

        let got = ModelInvoker::new(5, max_tokens, estimator)
            .expect("invoker")
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect("invoke");

        assert!(got.succeeded);
        assert_eq!(got.attempts, 2);
        assert_eq!(log.records().len(), 2);
        let retried = &backend.prompts("echo")[1];
        assert!(retried.starts_with("Say hello\n\n[ERROR MESSAGE FOR AGENT CONTEXT]: xxx"));
        assert!(estimator.estimate(retried, false) <= max_tokens - buffer.pinned_tokens());
        assert!(buffer.current_tokens() <= max_tokens);
    }

    #[test]
    fn error_note_is_dropped_when_nothing_fits() {
        let estimator = TokenEstimator::default();
        let mut buffer = buffer();
        let max_tokens = buffer.pinned_tokens() + estimator.estimate("Say hello", false);
        let backend = ScriptedBackend::new()
            .fail("echo", "timeout")
            .reply("echo", json!({"word": "hello"}));
        let log = MemoryExecutionLog::new();

        let got = ModelInvoker::new(5, max_tokens, estimator)
            .expect("invoker")
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect("invoke");

        assert!(got.succeeded);
        assert_eq!(backend.prompts("echo"), vec!["Say hello", "Say hello"]);
    }

    #[test]
    fn first_turn_over_budget_is_fatal() {
        let estimator = TokenEstimator::default();
        let mut buffer = buffer();
        let max_tokens = buffer.pinned_tokens() + 1;
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "hello"}));
        let log = MemoryExecutionLog::new();

        let err = ModelInvoker::new(5, max_tokens, estimator)
            .expect("invoker")
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect_err("turn too large");

        assert!(matches!(
            err,
            InvokeError::TurnTooLarge { agent: "echo", tokens: 3, .. }
        ));
        assert_eq!(backend.calls("echo"), 0);
        assert!(log.records().is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn log_failure_is_fatal() {
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "x"}));
        let mut buffer = buffer();

        let err = invoker(5)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &FailingLog,
                    buffer: &mut buffer,
                },
                &inputs(),
                None,
            )
            .expect_err("log fails");

        assert!(matches!(err, InvokeError::Log { agent: "echo", .. }));
    }

    #[test]
    fn attachment_is_charged_and_sent() {
        let backend = ScriptedBackend::new().reply("echo", json!({"word": "x"}));
        let log = MemoryExecutionLog::new();
        let mut buffer = buffer();

        invoker(1)
            .invoke::<EchoAgent>(
                InvokeScope {
                    run_id: "run-1",
                    backend: &backend,
                    log: &log,
                    buffer: &mut buffer,
                },
                &inputs(),
                Some("runs/run-1/capture.png"),
            )
            .expect("invoke");

        let turn = &buffer.entries()[1];
        assert_eq!(turn.attachment.as_deref(), Some("runs/run-1/capture.png"));
        assert_eq!(turn.token_cost, "Say hello".len().div_ceil(3) + 800);
        assert_eq!(
            backend.requests()[0].attachments,
            vec!["runs/run-1/capture.png".to_string()]
        );
    }
}
