//! Decides whether a request is a QA request and strips unrelated parts.

use serde::{Deserialize, Serialize};

use super::Agent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub agent_msg: String,
    pub intent: bool,
    /// QA-only rewrite of the request; empty when the request was already clean.
    pub modified_prompt: String,
}

pub struct IntentAgent;

impl Agent for IntentAgent {
    type Output = IntentVerdict;

    const NAME: &'static str = "intent_check";
    const TEMPLATE: &'static str = include_str!("prompts/intent_check.md");
    const SCHEMA: &'static str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/intent_check.schema.json"
    ));

    fn exhausted(reason: &str) -> IntentVerdict {
        IntentVerdict {
            agent_msg: format!("Could not classify the request: {reason}"),
            intent: false,
            modified_prompt: String::new(),
        }
    }
}
