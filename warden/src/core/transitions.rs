//! Status transitions for tasks in a [`TaskGraph`].
//!
//! Every transition is a pure in-memory mutation stamped with the caller's
//! timestamp. Nothing here persists: callers load, apply a batch of
//! transitions, then save once so related changes land together.

use chrono::{DateTime, Utc};

use crate::core::judge::MergeDecision;
use crate::core::types::{FailureRecord, TaskStatus};
use crate::error::GovernanceError;
use crate::graph::{Task, TaskGraph};

/// Completion details reported by a worker and accepted by the judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub summary: String,
    pub files_modified: Vec<String>,
    pub decision: Option<MergeDecision>,
}

impl TaskGraph {
    pub fn mark_running(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        let task = self.transition(id, &[TaskStatus::Pending], TaskStatus::Running, at)?;
        task.timestamps.started_at = Some(at);
        task.timestamps.finished_at = None;
        Ok(())
    }

    /// Completing a task clears its consecutive failure history.
    pub fn mark_completed(
        &mut self,
        id: &str,
        completion: Completion,
        at: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let task = self.transition(id, &[TaskStatus::Running], TaskStatus::Completed, at)?;
        task.summary = Some(completion.summary);
        task.files_modified = completion.files_modified;
        task.verification = completion.decision;
        task.failures.clear();
        task.blocked_reason = None;
        task.timestamps.finished_at = Some(at);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        id: &str,
        failure: FailureRecord,
        decision: Option<MergeDecision>,
        at: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let task = self.transition(
            id,
            &[TaskStatus::Running, TaskStatus::Pending],
            TaskStatus::Failed,
            at,
        )?;
        task.failures.push(failure);
        if decision.is_some() {
            task.verification = decision;
        }
        task.timestamps.finished_at = Some(at);
        Ok(())
    }

    pub fn mark_blocked(
        &mut self,
        id: &str,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), GovernanceError> {
        let task = self.transition(
            id,
            &[TaskStatus::Pending, TaskStatus::Running, TaskStatus::Failed],
            TaskStatus::Blocked,
            at,
        )?;
        task.blocked_reason = Some(reason.into());
        task.timestamps.finished_at = Some(at);
        Ok(())
    }

    pub fn mark_superseded(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        self.transition(
            id,
            &[
                TaskStatus::Pending,
                TaskStatus::Failed,
                TaskStatus::Blocked,
                TaskStatus::Deferred,
            ],
            TaskStatus::Superseded,
            at,
        )?;
        Ok(())
    }

    pub fn mark_deferred(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        self.transition(id, &[TaskStatus::Pending], TaskStatus::Deferred, at)?;
        Ok(())
    }

    /// Put a failed or blocked task back in the queue. Failure history is kept.
    pub fn requeue(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        let task = self.transition(
            id,
            &[TaskStatus::Failed, TaskStatus::Blocked],
            TaskStatus::Pending,
            at,
        )?;
        task.blocked_reason = None;
        Ok(())
    }

    /// Human-approved retry: requeue and forget the consecutive failure history.
    pub fn retry(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), GovernanceError> {
        self.requeue(id, at)?;
        self.get_mut(id)?.failures.clear();
        Ok(())
    }

    /// Return tasks left `running` by an interrupted orchestrator to `pending`.
    pub fn recover_interrupted(&mut self, at: DateTime<Utc>) -> Vec<String> {
        let mut recovered = Vec::new();
        for task in self.tasks_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
                task.timestamps.updated_at = Some(at);
                task.timestamps.started_at = None;
                recovered.push(task.id.clone());
            }
        }
        recovered
    }

    pub fn set_checkpoint(&mut self, id: &str, checkpoint_id: &str) -> Result<(), GovernanceError> {
        self.get_mut(id)?.checkpoint = Some(checkpoint_id.to_string());
        Ok(())
    }

    fn transition(
        &mut self,
        id: &str,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<&mut Task, GovernanceError> {
        let task = self.get_mut(id)?;
        if !allowed_from.contains(&task.status) {
            return Err(GovernanceError::InvalidTransition {
                task: id.to_string(),
                from: task.status,
                to,
            });
        }
        task.status = to;
        task.timestamps.updated_at = Some(at);
        Ok(task)
    }
}
