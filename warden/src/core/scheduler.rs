//! Wave selection and stall detection over a [`TaskGraph`].
//!
//! Selection is a pure read: repeated calls without an intervening mutation
//! return the same answer.

use std::collections::HashMap;
use std::fmt;

use crate::core::types::TaskStatus;
use crate::graph::{Task, TaskGraph};

/// A batch of tasks that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub number: u32,
    /// Ready task ids in graph order.
    pub task_ids: Vec<String>,
}

/// Outcome of asking the scheduler for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveSelection {
    Ready(Wave),
    /// Every task is completed, superseded, or deferred.
    Complete,
    /// Nothing is ready and not everything is settled.
    Stalled(StallReport),
}

/// Evidence for a run that cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StallReport {
    /// Pending/blocked tasks that can never become ready.
    pub stuck: Vec<StuckTask>,
    pub failed: Vec<String>,
    /// Tasks still marked running (an interrupted run or a caller bug).
    pub running: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckTask {
    pub id: String,
    pub status: TaskStatus,
    /// Immediate dependencies that will never complete, with their status.
    pub blocked_by: Vec<(String, TaskStatus)>,
}

impl StallReport {
    pub fn stuck_ids(&self) -> Vec<String> {
        self.stuck.iter().map(|task| task.id.clone()).collect()
    }
}

impl fmt::Display for StallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "no task can become ready")?;
        for task in &self.stuck {
            if task.blocked_by.is_empty() {
                writeln!(f, "- {} is {}", task.id, task.status)?;
            } else {
                let deps: Vec<String> = task
                    .blocked_by
                    .iter()
                    .map(|(id, status)| format!("{id} ({status})"))
                    .collect();
                writeln!(
                    f,
                    "- {} ({}) waits on {}",
                    task.id,
                    task.status,
                    deps.join(", ")
                )?;
            }
        }
        if !self.failed.is_empty() {
            writeln!(f, "failed: {}", self.failed.join(", "))?;
        }
        if !self.running.is_empty() {
            writeln!(f, "still running: {}", self.running.join(", "))?;
        }
        Ok(())
    }
}

/// A task is ready iff it is pending and every dependency is completed.
pub fn is_ready(graph: &TaskGraph, task: &Task) -> bool {
    task.status == TaskStatus::Pending
        && task.depends_on.iter().all(|dep| {
            graph
                .get(dep)
                .is_some_and(|d| d.status == TaskStatus::Completed)
        })
}

pub fn ready_tasks(graph: &TaskGraph) -> Vec<&Task> {
    graph
        .tasks()
        .iter()
        .filter(|task| is_ready(graph, task))
        .collect()
}

/// Select the ready tasks sharing the lowest wave number.
///
/// Ready tasks in higher waves wait for a later call. Wave numbers are trusted
/// here; consistency with dependencies is enforced when the graph is built.
pub fn next_wave(graph: &TaskGraph) -> WaveSelection {
    let ready = ready_tasks(graph);
    if let Some(number) = ready.iter().map(|task| task.wave).min() {
        return WaveSelection::Ready(Wave {
            number,
            task_ids: ready
                .iter()
                .filter(|task| task.wave == number)
                .map(|task| task.id.clone())
                .collect(),
        });
    }
    if graph.tasks().iter().all(|task| task.status.is_settled()) {
        return WaveSelection::Complete;
    }
    WaveSelection::Stalled(stall_report(graph))
}

/// Tasks that can never become ready given current statuses.
///
/// Reachability is followed through every hop, so a pending task three levels
/// above a failed task is reported, not only its direct dependents.
pub fn detect_deadlock(graph: &TaskGraph) -> Vec<StuckTask> {
    let mut memo: HashMap<&str, bool> = HashMap::new();
    let mut stuck = Vec::new();
    for task in graph.tasks() {
        match task.status {
            TaskStatus::Blocked => stuck.push(StuckTask {
                id: task.id.clone(),
                status: task.status,
                blocked_by: Vec::new(),
            }),
            TaskStatus::Pending if !can_progress(graph, &task.id, &mut memo, &mut Vec::new()) => {
                let mut blocked_by = Vec::new();
                for dep in &task.depends_on {
                    if can_progress(graph, dep, &mut memo, &mut Vec::new()) {
                        continue;
                    }
                    let status = graph
                        .get(dep)
                        .map_or(TaskStatus::Failed, |dependency| dependency.status);
                    blocked_by.push((dep.clone(), status));
                }
                stuck.push(StuckTask {
                    id: task.id.clone(),
                    status: task.status,
                    blocked_by,
                });
            }
            _ => {}
        }
    }
    stuck
}

pub fn stall_report(graph: &TaskGraph) -> StallReport {
    StallReport {
        stuck: detect_deadlock(graph),
        failed: ids_with_status(graph, TaskStatus::Failed),
        running: ids_with_status(graph, TaskStatus::Running),
    }
}

fn ids_with_status(graph: &TaskGraph, status: TaskStatus) -> Vec<String> {
    graph
        .tasks()
        .iter()
        .filter(|task| task.status == status)
        .map(|task| task.id.clone())
        .collect()
}

/// True if the task is completed or may still complete.
fn can_progress<'a>(
    graph: &'a TaskGraph,
    id: &'a str,
    memo: &mut HashMap<&'a str, bool>,
    visiting: &mut Vec<&'a str>,
) -> bool {
    if let Some(&known) = memo.get(id) {
        return known;
    }
    // A cycle can never make progress; graphs are validated against this at load.
    if visiting.contains(&id) {
        return false;
    }
    let Some(task) = graph.get(id) else {
        return false;
    };
    let result = match task.status {
        TaskStatus::Completed | TaskStatus::Running => true,
        TaskStatus::Failed
        | TaskStatus::Blocked
        | TaskStatus::Superseded
        | TaskStatus::Deferred => false,
        TaskStatus::Pending => {
            visiting.push(id);
            let ok = task
                .depends_on
                .iter()
                .all(|dep| can_progress(graph, dep, memo, visiting));
            visiting.pop();
            ok
        }
    };
    memo.insert(id, result);
    result
}
