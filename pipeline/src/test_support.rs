//! Scripted collaborators for tests.
//!
//! Every double is `Send + Sync` so one instance can back concurrent runs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::TaskResult;
use crate::io::automation::{Automation, Capture, CaptureRequest, StepProgress, TaskRequest};
use crate::io::backend::{ModelBackend, ModelRequest};
use crate::io::probe::TargetProbe;

/// A backend request as seen by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub agent: String,
    /// Content of the current (last) turn.
    pub prompt: String,
    pub attachments: Vec<String>,
    pub message_count: usize,
}

/// Backend that replays queued replies per agent.
///
/// Queued replies are consumed first; once an agent's queue is empty its
/// `always` reply (if any) is returned on every call.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    queues: Mutex<BTreeMap<String, VecDeque<Result<Value, String>>>>,
    always: BTreeMap<String, Value>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose agents all answer positively.
    pub fn all_pass() -> Self {
        Self::new()
            .always(
                "intent_check",
                json!({"agent_msg": "QA request", "intent": true, "modified_prompt": ""}),
            )
            .always(
                "feasibility_check",
                json!({"agent_msg": "page shows the form", "feasible": true}),
            )
            .always(
                "query_refinement",
                json!({"agent_msg": "clarified", "enhanced_prompt": "Click the submit button and confirm the success message."}),
            )
    }

    pub fn reply(mut self, agent: &str, value: Value) -> Self {
        self.queue(agent).push_back(Ok(value));
        self
    }

    pub fn fail(mut self, agent: &str, message: &str) -> Self {
        self.queue(agent).push_back(Err(message.to_string()));
        self
    }

    pub fn always(mut self, agent: &str, value: Value) -> Self {
        self.always.insert(agent.to_string(), value);
        self
    }

    fn queue(&mut self, agent: &str) -> &mut VecDeque<Result<Value, String>> {
        self.queues
            .get_mut()
            .expect("queue lock")
            .entry(agent.to_string())
            .or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls(&self, agent: &str) -> usize {
        self.requests().iter().filter(|r| r.agent == agent).count()
    }

    pub fn prompts(&self, agent: &str) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.agent == agent)
            .map(|r| r.prompt)
            .collect()
    }
}

impl ModelBackend for ScriptedBackend {
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                agent: request.agent.to_string(),
                prompt: request
                    .messages
                    .last()
                    .map(|entry| entry.content.clone())
                    .unwrap_or_default(),
                attachments: request
                    .attachments()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                message_count: request.messages.len(),
            });

        let queued = self
            .queues
            .lock()
            .expect("queue lock")
            .get_mut(request.agent)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .always
                .get(request.agent)
                .cloned()
                .ok_or_else(|| anyhow!("no scripted reply for agent {}", request.agent)),
        }
    }
}

/// Automation with fixed capture and task outcomes.
#[derive(Debug)]
pub struct ScriptedAutomation {
    capture: Result<Capture, String>,
    task: Result<TaskResult, String>,
    steps: u32,
    capture_calls: AtomicUsize,
    instructions: Mutex<Vec<String>>,
}

impl Default for ScriptedAutomation {
    fn default() -> Self {
        Self {
            capture: Ok(Capture {
                reference: "captures/page.png".to_string(),
                ok: true,
            }),
            task: Ok(TaskResult {
                final_text: "Submit button works: success message shown.".to_string(),
                ok: true,
                artifact_refs: vec!["captures/final.png".to_string()],
            }),
            steps: 2,
            capture_calls: AtomicUsize::new(0),
            instructions: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_error(mut self, message: &str) -> Self {
        self.capture = Err(message.to_string());
        self
    }

    pub fn capture_result(mut self, capture: Capture) -> Self {
        self.capture = Ok(capture);
        self
    }

    pub fn task_result(mut self, result: TaskResult) -> Self {
        self.task = Ok(result);
        self
    }

    pub fn task_error(mut self, message: &str) -> Self {
        self.task = Err(message.to_string());
        self
    }

    /// Number of progress steps reported per task.
    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().expect("instructions lock").clone()
    }
}

impl Automation for ScriptedAutomation {
    fn capture(&self, _request: &CaptureRequest<'_>) -> Result<Capture> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.capture.clone().map_err(|message| anyhow!(message))
    }

    fn run_task(
        &self,
        request: &TaskRequest<'_>,
        on_step: &mut dyn FnMut(&StepProgress),
    ) -> Result<TaskResult> {
        self.instructions
            .lock()
            .expect("instructions lock")
            .push(request.instruction.to_string());
        for step in 1..=self.steps.min(request.step_budget) {
            on_step(&StepProgress {
                step,
                url: Some(request.target.to_string()),
                action: Some("click".to_string()),
                memory: None,
            });
        }
        self.task.clone().map_err(|message| anyhow!(message))
    }
}

/// Probe with a fixed answer.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    exists: bool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(exists: bool) -> Self {
        Self {
            exists,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TargetProbe for ScriptedProbe {
    fn exists(&self, _target: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.exists
    }
}
