//! Escalation accounting: when automation must stop and hand over to a human.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::FailureRecord;
use crate::error::GovernanceError;
use crate::graph::Task;

/// Consecutive failures after which a task is no longer dispatched.
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;
/// Remediation rounds allowed per phase before automation is disabled.
pub const MAX_GAP_CLOSURE_ITERATIONS: u32 = 3;

/// Persisted to `audit/escalations/<task>.json` when a task is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub task_id: String,
    pub phase: String,
    pub reason: String,
    pub failures: Vec<FailureRecord>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Dispatch,
    Escalate(EscalationRecord),
}

/// Decide whether a task may be dispatched again.
///
/// A task with [`MAX_CONSECUTIVE_FAILURES`] failure records is refused; the
/// returned record carries every failure so a human can pick it up.
pub fn dispatch_gate(task: &Task, at: DateTime<Utc>) -> GateDecision {
    if task.failures.len() < MAX_CONSECUTIVE_FAILURES {
        return GateDecision::Dispatch;
    }
    let last = task
        .last_failure()
        .map(|failure| failure.message.as_str())
        .unwrap_or_default();
    GateDecision::Escalate(EscalationRecord {
        task_id: task.id.clone(),
        phase: task.phase.clone(),
        reason: format!(
            "{} consecutive failures; automatic dispatch refused (last: {last})",
            task.failures.len()
        ),
        failures: task.failures.clone(),
        at,
    })
}

/// Per-phase remediation counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapClosure {
    pub iterations: u32,
    /// Set once the cap is reached; cleared only by an explicit reset.
    #[serde(default)]
    pub disabled: bool,
}

impl GapClosure {
    /// Claim the next remediation round, returning its 1-based number.
    ///
    /// Asking for a round past the cap is refused and disables automation for
    /// the phase until [`GapClosure::reset`].
    pub fn begin_iteration(&mut self, phase: &str) -> Result<u32, GovernanceError> {
        if self.disabled || self.exhausted() {
            self.disabled = true;
            return Err(GovernanceError::EscalationLimitReached {
                unit: format!("phase '{phase}'"),
                detail: format!(
                    "{} gap-closure iterations used; reset required before further remediation",
                    self.iterations
                ),
            });
        }
        self.iterations += 1;
        Ok(self.iterations)
    }

    pub fn exhausted(&self) -> bool {
        self.iterations >= MAX_GAP_CLOSURE_ITERATIONS
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
