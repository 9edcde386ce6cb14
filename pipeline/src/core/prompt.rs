//! Prompt template rendering for model-backed agents.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};

/// Marker that introduces the previous attempt's failure in a retried prompt.
pub const ERROR_NOTE_MARKER: &str = "[ERROR MESSAGE FOR AGENT CONTEXT]:";

/// Render `template` with `inputs` bound as top-level variables.
///
/// Undefined variables are errors, not empty strings. When `error_note` is set
/// it is appended after the rendered text; the note is never itself rendered,
/// so template syntax inside an error message cannot break the prompt.
pub fn render_prompt(
    name: &str,
    template: &str,
    inputs: &BTreeMap<String, String>,
    error_note: Option<&str>,
) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let rendered = env.render_named_str(name, template, inputs)?;

    match error_note.map(str::trim).filter(|note| !note.is_empty()) {
        Some(note) => Ok(format!("{rendered}\n\n{ERROR_NOTE_MARKER} {note}")),
        None => Ok(rendered),
    }
}
