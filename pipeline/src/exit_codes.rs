//! Stable exit codes for `qa-pipeline` commands.

/// Command succeeded; for `run`, the task executed and succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, layout, config, or run identity.
pub const INVALID: i32 = 1;
/// `run` stopped at a gate or was cancelled; `probe` found the target unreachable.
pub const HALTED: i32 = 2;
/// `run` executed the task but the automation reported failure.
pub const TASK_FAILED: i32 = 3;
