//! Deterministic, pure governance logic.
//!
//! Nothing under `core` touches the filesystem, git, or child processes. Every
//! function operates on in-memory data and returns a deterministic result.

pub mod escalation;
pub mod filter;
pub mod glob;
pub mod invariants;
pub mod judge;
pub mod scheduler;
pub mod signal;
pub mod transitions;
pub mod types;
