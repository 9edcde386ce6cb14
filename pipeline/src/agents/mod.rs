//! Model-backed agents and the invoker that runs them.
//!
//! Each agent owns a prompt template and an output schema. The invoker renders
//! the template, asks the backend for schema-conforming JSON, and retries on
//! failure.

use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod feasibility;
pub mod intent;
pub mod invoker;
pub mod refinement;

/// Static description of a structured-output agent.
pub trait Agent {
    type Output: DeserializeOwned + Serialize;

    /// Stable name used in logs and attempt records.
    const NAME: &'static str;
    /// minijinja template rendered with the invocation inputs.
    const TEMPLATE: &'static str;
    /// JSON Schema (draft 2020-12) the reply must satisfy.
    const SCHEMA: &'static str;

    /// Output reported when every attempt failed.
    fn exhausted(reason: &str) -> Self::Output;
}

/// `(agent name, schema)` for every bundled agent.
pub fn output_schemas() -> [(&'static str, &'static str); 3] {
    [
        (intent::IntentAgent::NAME, intent::IntentAgent::SCHEMA),
        (
            feasibility::FeasibilityAgent::NAME,
            feasibility::FeasibilityAgent::SCHEMA,
        ),
        (
            refinement::RefinementAgent::NAME,
            refinement::RefinementAgent::SCHEMA,
        ),
    ]
}
