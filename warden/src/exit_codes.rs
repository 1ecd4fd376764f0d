//! Stable exit codes for warden CLI commands.

/// Command succeeded, or a wave is ready to run.
pub const OK: i32 = 0;
/// Invalid layout, config, or graph, or any other error.
pub const INVALID: i32 = 1;
/// Every task is settled.
pub const COMPLETE: i32 = 2;
/// No task can become ready, or `run` hit its cycle cap with work left.
pub const STALLED: i32 = 3;
/// `judge` rejected the result, or `retry`/`gap-closure` was refused by escalation limits.
pub const REJECTED: i32 = 4;
