//! QA task orchestration pipeline.
//!
//! A free-text testing request and a target URL pass through a fixed chain of
//! gates (intent check, target probe, page capture, feasibility check,
//! instruction refinement) before a browser-automation collaborator executes
//! the task. Every run ends in a [`core::artifact::RunArtifact`].
//!
//! - **[`core`]**: Pure logic (run state, routers, message buffer, prompt
//!   rendering, artifacts). No I/O.
//! - **[`io`]**: Collaborator contracts and their bundled adapters (model
//!   backend, automation, probe, logs, artifact store, config).
//! - **[`agents`]**: Model-backed agents and the retrying invoker.
//! - **[`nodes`]** and **[`engine`]**: Node implementations and the workflow
//!   engine that drives them.
//!
//! [`run`] wires the bundled adapters together for the CLI.

pub mod agents;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod nodes;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
