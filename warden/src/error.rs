//! Typed governance failures.
//!
//! Plumbing code returns `anyhow::Result`; the failures callers need to react
//! to structurally are raised as [`GovernanceError`] and recovered with
//! `anyhow::Error::downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::{TaskStatus, VerificationFlag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    #[error("task '{task}' depends on unknown task '{missing}'")]
    DanglingDependency { task: String, missing: String },

    #[error("duplicate task id '{task}'")]
    DuplicateTask { task: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error(
        "task '{task}' is in wave {wave} but depends on '{dependency}' in wave {dependency_wave} (dependency wave must be lower)"
    )]
    WaveOrder {
        task: String,
        wave: u32,
        dependency: String,
        dependency_wave: u32,
    },

    #[error("invalid task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("unknown task '{task}'")]
    UnknownTask { task: String },

    #[error("task '{task}' cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("no task can become ready; stuck tasks: {}", tasks.join(", "))]
    Deadlock { tasks: Vec<String> },

    #[error("dispatch of task '{task}' timed out after {timeout_secs}s")]
    DispatchTimeout { task: String, timeout_secs: u64 },

    #[error("task '{task}': {tag} tag found, payload unparseable: {detail}")]
    MalformedSignal {
        task: String,
        tag: String,
        detail: String,
    },

    #[error("task '{task}': worker emitted no COMPLETE or BLOCKED tag")]
    NoSignal { task: String },

    #[error(
        "rollback to checkpoint '{checkpoint}' failed: {detail} (discarded changes quarantined at {})",
        quarantine.display()
    )]
    RollbackFailure {
        checkpoint: String,
        quarantine: PathBuf,
        detail: String,
    },

    #[error("verification flag {flag} is false for task '{task}'")]
    VerificationFlagFalse {
        task: String,
        flag: VerificationFlag,
    },

    #[error("escalation limit reached for {unit}: {detail}")]
    EscalationLimitReached { unit: String, detail: String },

    #[error("precondition failed: {0}")]
    Precondition(String),
}
