//! Graph load/save with schema and invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::{first_structural_error, validate_invariants};
use crate::error::GovernanceError;
use crate::graph::{GRAPH_VERSION, Task, TaskGraph};
use crate::io::atomic::write_json_atomic;
use crate::io::init::{GRAPH_SCHEMA, WardenPaths};

/// Everything wrong with a graph file, gathered in one pass.
#[derive(Debug, Default)]
pub struct GraphCheck {
    pub schema_errors: Vec<String>,
    pub violations: Vec<GovernanceError>,
    /// Parsed tasks, present when the file passed schema validation.
    pub tasks: Option<Vec<Task>>,
}

impl GraphCheck {
    pub fn is_valid(&self) -> bool {
        self.schema_errors.is_empty() && self.violations.is_empty() && self.tasks.is_some()
    }
}

/// Validate a graph file against the schema and every semantic invariant.
pub fn check_graph(paths: &WardenPaths) -> Result<GraphCheck> {
    let contents = fs::read_to_string(&paths.graph_path)
        .with_context(|| format!("read graph {}", paths.graph_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse graph {}", paths.graph_path.display()))?;

    let schema_errors = schema_errors(&paths.schema_path, &value)?;
    if !schema_errors.is_empty() {
        return Ok(GraphCheck {
            schema_errors,
            ..GraphCheck::default()
        });
    }

    let tasks: Vec<Task> = serde_json::from_value(value["tasks"].clone())
        .with_context(|| format!("deserialize graph {}", paths.graph_path.display()))?;
    let violations = validate_invariants(&tasks);
    Ok(GraphCheck {
        schema_errors,
        violations,
        tasks: Some(tasks),
    })
}

/// Load the task graph, rejecting it before any scheduling if it is invalid.
///
/// Invariant failures surface as a typed [`GovernanceError`] (recoverable via
/// `downcast_ref`), choosing dangling dependencies and cycles first.
pub fn load_graph(paths: &WardenPaths) -> Result<TaskGraph> {
    let check = check_graph(paths)?;
    if !check.schema_errors.is_empty() {
        return Err(anyhow!(
            "task graph schema validation failed: {}",
            check.schema_errors.join("; ")
        ));
    }
    if let Some(err) = first_structural_error(&check.violations) {
        for violation in &check.violations {
            warn!(%violation, "graph invariant violated");
        }
        let count = check.violations.len();
        return Err(anyhow::Error::new(err)).with_context(|| {
            format!(
                "task graph {} rejected ({count} violation(s))",
                paths.graph_path.display()
            )
        });
    }
    let tasks = check
        .tasks
        .ok_or_else(|| anyhow!("task graph produced no tasks"))?;
    let graph = TaskGraph::from_tasks(tasks)?;
    debug!(tasks = graph.len(), "graph loaded");
    Ok(graph)
}

/// Write the graph canonically (insertion order, current format version).
pub fn write_graph(paths: &WardenPaths, graph: &TaskGraph) -> Result<()> {
    debug!(tasks = graph.len(), version = GRAPH_VERSION, "writing graph");
    write_json_atomic(&paths.graph_path, graph)
}

fn schema_errors(schema_path: &Path, value: &Value) -> Result<Vec<String>> {
    let schema_contents = if schema_path.exists() {
        fs::read_to_string(schema_path)
            .with_context(|| format!("read schema {}", schema_path.display()))?
    } else {
        GRAPH_SCHEMA.to_string()
    };
    let schema_value: Value = serde_json::from_str(&schema_contents)
        .with_context(|| format!("parse schema {}", schema_path.display()))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    Ok(compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect())
}
