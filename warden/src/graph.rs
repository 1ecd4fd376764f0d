//! Task graph data model.
//!
//! The graph is an ordered list of tasks plus a derived wave index. It only
//! supports mutation and querying; scheduling decisions live in
//! [`crate::core::scheduler`] and status transitions in
//! [`crate::core::transitions`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::invariants::{check_new_task, first_structural_error, validate_invariants};
use crate::core::judge::MergeDecision;
use crate::core::types::{FailureRecord, RiskTier, TaskStatus, TestMode};
use crate::error::GovernanceError;

pub const GRAPH_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub phase: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub risk: RiskTier,
    pub test_mode: TestMode,
    pub depends_on: Vec<String>,
    /// Files the task is allowed to touch.
    pub files: Vec<String>,
    pub wave: u32,
    /// Acceptance-criteria identifiers resolved against the project store.
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<MergeDecision>,
    /// Consecutive failures since the last completion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub timestamps: TaskTimestamps,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTimestamps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a pending task with no optional state.
    pub fn new(
        id: impl Into<String>,
        phase: impl Into<String>,
        description: impl Into<String>,
        wave: u32,
    ) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            risk: RiskTier::Low,
            test_mode: TestMode::Standard,
            depends_on: Vec::new(),
            files: Vec::new(),
            wave,
            acceptance: Vec::new(),
            checkpoint: None,
            verification: None,
            failures: Vec::new(),
            blocked_reason: None,
            summary: None,
            files_modified: Vec::new(),
            timestamps: TaskTimestamps::default(),
        }
    }

    pub fn last_failure(&self) -> Option<&FailureRecord> {
        self.failures.last()
    }
}

/// Serialized shape of `.warden/state/graph.json`.
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    version: u32,
    tasks: Vec<Task>,
}

/// Ordered collection of tasks with a wave index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "GraphFile", try_from = "GraphFile")]
pub struct TaskGraph {
    tasks: Vec<Task>,
    positions: HashMap<String, usize>,
    waves: BTreeMap<u32, Vec<String>>,
}

impl From<TaskGraph> for GraphFile {
    fn from(graph: TaskGraph) -> Self {
        GraphFile {
            version: GRAPH_VERSION,
            tasks: graph.tasks,
        }
    }
}

impl TryFrom<GraphFile> for TaskGraph {
    type Error = GovernanceError;

    fn try_from(file: GraphFile) -> Result<Self, Self::Error> {
        if file.version != GRAPH_VERSION {
            return Err(GovernanceError::Precondition(format!(
                "unsupported graph version {} (expected {GRAPH_VERSION})",
                file.version
            )));
        }
        TaskGraph::from_tasks(file.tasks)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            positions: HashMap::new(),
            waves: BTreeMap::new(),
        }
    }

    /// Build a graph, rejecting it if any structural invariant is violated.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, GovernanceError> {
        let violations = validate_invariants(&tasks);
        if let Some(err) = first_structural_error(&violations) {
            return Err(err);
        }
        let mut graph = Self {
            tasks,
            positions: HashMap::new(),
            waves: BTreeMap::new(),
        };
        graph.reindex();
        Ok(graph)
    }

    /// Append a task whose dependencies already exist in the graph.
    pub fn add_task(&mut self, task: Task) -> Result<(), GovernanceError> {
        check_new_task(&task, |id| self.get(id))?;
        self.positions.insert(task.id.clone(), self.tasks.len());
        self.waves
            .entry(task.wave)
            .or_default()
            .push(task.id.clone());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.positions.get(id).map(|&idx| &self.tasks[idx])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Task, GovernanceError> {
        match self.positions.get(id) {
            Some(&idx) => Ok(&mut self.tasks[idx]),
            None => Err(GovernanceError::UnknownTask {
                task: id.to_string(),
            }),
        }
    }

    /// Ids and waves must not be changed through this iterator; the index is not rebuilt.
    pub(crate) fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task ids grouped by wave number, in insertion order within a wave.
    pub fn wave_index(&self) -> &BTreeMap<u32, Vec<String>> {
        &self.waves
    }

    pub fn tasks_in_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |task| task.phase == phase)
    }

    fn reindex(&mut self) {
        self.positions.clear();
        self.waves.clear();
        for (idx, task) in self.tasks.iter().enumerate() {
            self.positions.insert(task.id.clone(), idx);
            self.waves.entry(task.wave).or_default().push(task.id.clone());
        }
    }
}

impl TryFrom<Vec<Task>> for TaskGraph {
    type Error = GovernanceError;

    fn try_from(tasks: Vec<Task>) -> Result<Self, Self::Error> {
        TaskGraph::from_tasks(tasks)
    }
}
