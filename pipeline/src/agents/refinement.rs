//! Turns a feasible test into an execution-ready browser instruction.

use serde::{Deserialize, Serialize};

use super::Agent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    pub agent_msg: String,
    pub enhanced_prompt: String,
}

pub struct RefinementAgent;

impl Agent for RefinementAgent {
    type Output = Refinement;

    const NAME: &'static str = "query_refinement";
    const TEMPLATE: &'static str = include_str!("prompts/query_refinement.md");
    const SCHEMA: &'static str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/query_refinement.schema.json"
    ));

    // An empty instruction makes the task fall back to the effective query.
    fn exhausted(reason: &str) -> Refinement {
        Refinement {
            agent_msg: format!("Could not refine the instruction: {reason}"),
            enhanced_prompt: String::new(),
        }
    }
}
