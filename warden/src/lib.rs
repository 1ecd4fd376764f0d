//! Governance engine for code-modifying workers.
//!
//! A planner hands warden a task graph; warden schedules it in waves, builds a
//! bounded context packet per task, dispatches an external worker, judges the
//! result, and checkpoints risky work so it can be rolled back. The crate is
//! split the same way throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, transitions, signal
//!   parsing, judging, escalation). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem stores, git, worker and
//!   verifier processes, audit records).
//!
//! Orchestration modules ([`orchestrator`], [`wave`], [`validate`]) combine the
//! two to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod graph;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod wave;
