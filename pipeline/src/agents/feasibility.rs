//! Judges whether a test can run on the captured page.

use serde::{Deserialize, Serialize};

use super::Agent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeasibilityVerdict {
    pub agent_msg: String,
    pub feasible: bool,
}

pub struct FeasibilityAgent;

impl Agent for FeasibilityAgent {
    type Output = FeasibilityVerdict;

    const NAME: &'static str = "feasibility_check";
    const TEMPLATE: &'static str = include_str!("prompts/feasibility_check.md");
    const SCHEMA: &'static str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/feasibility_check.schema.json"
    ));

    fn exhausted(reason: &str) -> FeasibilityVerdict {
        FeasibilityVerdict {
            agent_msg: format!("Could not judge feasibility: {reason}"),
            feasible: false,
        }
    }
}
