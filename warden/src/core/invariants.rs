//! Semantic invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::error::GovernanceError;
use crate::graph::Task;

/// Check graph invariants not expressible in JSON Schema:
/// - No duplicate ids, no duplicate touched files within a task
/// - `wave >= 1`, non-empty `phase`, ids usable as a single path component
/// - Every dependency exists and sits in a strictly lower wave
/// - No dependency cycles (DFS with a recursion stack)
///
/// All violations are returned, in task order, so a planner can fix them in one pass.
pub fn validate_invariants(tasks: &[Task]) -> Vec<GovernanceError> {
    let mut errors = Vec::new();
    let mut by_id: HashMap<&str, &Task> = HashMap::new();

    for task in tasks {
        if by_id.insert(task.id.as_str(), task).is_some() {
            errors.push(GovernanceError::DuplicateTask {
                task: task.id.clone(),
            });
        }
        errors.extend(task_field_errors(task));
    }

    let mut dangling = false;
    for task in tasks {
        for dep in &task.depends_on {
            match by_id.get(dep.as_str()) {
                None => {
                    dangling = true;
                    errors.push(GovernanceError::DanglingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                }
                Some(dependency) if dep != &task.id && dependency.wave >= task.wave => {
                    errors.push(GovernanceError::WaveOrder {
                        task: task.id.clone(),
                        wave: task.wave,
                        dependency: dep.clone(),
                        dependency_wave: dependency.wave,
                    });
                }
                Some(_) => {}
            }
        }
    }

    if !dangling && let Some(path) = find_cycle(tasks) {
        errors.push(GovernanceError::Cycle { path });
    }

    errors
}

/// Pick the violation to surface as the load failure.
///
/// Dangling dependencies and cycles are reported ahead of field-level problems
/// because they make the graph unschedulable as a whole.
pub fn first_structural_error(errors: &[GovernanceError]) -> Option<GovernanceError> {
    errors
        .iter()
        .find(|err| matches!(err, GovernanceError::DanglingDependency { .. }))
        .or_else(|| {
            errors
                .iter()
                .find(|err| matches!(err, GovernanceError::Cycle { .. }))
        })
        .or_else(|| errors.first())
        .cloned()
}

/// Validate a task about to be appended to an existing graph.
pub fn check_new_task<'a, F>(task: &Task, lookup: F) -> Result<(), GovernanceError>
where
    F: Fn(&str) -> Option<&'a Task>,
{
    if lookup(&task.id).is_some() {
        return Err(GovernanceError::DuplicateTask {
            task: task.id.clone(),
        });
    }
    if let Some(err) = task_field_errors(task).into_iter().next() {
        return Err(err);
    }
    if task.depends_on.contains(&task.id) {
        return Err(GovernanceError::Cycle {
            path: vec![task.id.clone(), task.id.clone()],
        });
    }
    for dep in &task.depends_on {
        let Some(dependency) = lookup(dep) else {
            return Err(GovernanceError::DanglingDependency {
                task: task.id.clone(),
                missing: dep.clone(),
            });
        };
        if dependency.wave >= task.wave {
            return Err(GovernanceError::WaveOrder {
                task: task.id.clone(),
                wave: task.wave,
                dependency: dep.clone(),
                dependency_wave: dependency.wave,
            });
        }
    }
    Ok(())
}

fn task_field_errors(task: &Task) -> Vec<GovernanceError> {
    let mut errors = Vec::new();
    let invalid = |reason: String| GovernanceError::InvalidTask {
        task: task.id.clone(),
        reason,
    };

    if let Some(reason) = id_problem(&task.id) {
        errors.push(invalid(reason));
    }
    if task.phase.trim().is_empty() {
        errors.push(invalid("phase must not be empty".to_string()));
    }
    if task.wave == 0 {
        errors.push(invalid("wave must be >= 1".to_string()));
    }
    let mut seen = HashSet::new();
    for file in &task.files {
        if file.trim().is_empty() {
            errors.push(invalid("touched file path must not be empty".to_string()));
        } else if !seen.insert(file.as_str()) {
            errors.push(invalid(format!("file '{file}' listed twice")));
        }
    }
    errors
}

/// Task ids name audit directories and escalation files, so they must be a
/// single safe path component.
fn id_problem(id: &str) -> Option<String> {
    if id.is_empty() {
        return Some("id must not be empty".to_string());
    }
    if id.starts_with('.') {
        return Some("id must not start with '.'".to_string());
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Some(format!(
            "id contains '{bad}' (allowed: ASCII letters, digits, '-', '_', '.')"
        ));
    }
    None
}

/// Find one dependency cycle, returned as `a -> b -> ... -> a`.
fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    let deps: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.depends_on.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for task in tasks {
        if let Some(cycle) = visit(task.id.as_str(), &deps, &mut visited, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    if let Some(pos) = stack.iter().position(|on_stack| *on_stack == id) {
        let mut cycle: Vec<String> = stack[pos..].iter().map(|s| (*s).to_string()).collect();
        cycle.push(id.to_string());
        return Some(cycle);
    }
    if !visited.insert(id) {
        return None;
    }

    stack.push(id);
    if let Some(children) = deps.get(id) {
        for child in children.iter() {
            if let Some(cycle) = visit(child.as_str(), deps, visited, stack) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn valid_graph_has_no_violations() {
        let tasks = vec![task("a", 1, &[]), task("b", 1, &[]), task("c", 2, &["a", "b"])];
        assert!(validate_invariants(&tasks).is_empty());
    }

    #[test]
    fn reports_dangling_dependency() {
        let tasks = vec![task("a", 1, &[]), task("d", 2, &["missing"])];
        let errors = validate_invariants(&tasks);
        assert_eq!(
            first_structural_error(&errors),
            Some(GovernanceError::DanglingDependency {
                task: "d".to_string(),
                missing: "missing".to_string()
            })
        );
    }

    #[test]
    fn rejects_dependency_in_same_or_later_wave() {
        let tasks = vec![task("a", 2, &[]), task("b", 2, &["a"])];
        let errors = validate_invariants(&tasks);
        assert!(errors.iter().any(|err| matches!(
            err,
            GovernanceError::WaveOrder { task, dependency_wave: 2, .. } if task == "b"
        )));
    }

    #[test]
    fn finds_multi_hop_cycle() {
        // Waves are deliberately inconsistent so the cycle is also reported on its own.
        let tasks = vec![
            task("a", 1, &["c"]),
            task("b", 2, &["a"]),
            task("c", 3, &["b"]),
        ];
        let errors = validate_invariants(&tasks);
        let cycle = errors
            .iter()
            .find_map(|err| match err {
                GovernanceError::Cycle { path } => Some(path.clone()),
                _ => None,
            })
            .expect("cycle reported");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn reports_duplicate_ids_and_files() {
        let mut dup = task("a", 1, &[]);
        dup.files = vec!["src/lib.rs".to_string(), "src/lib.rs".to_string()];
        let tasks = vec![task("a", 1, &[]), dup];
        let errors = validate_invariants(&tasks);
        assert!(errors.iter().any(|e| matches!(e, GovernanceError::DuplicateTask { .. })));
        assert!(
            errors
                .iter()
                .any(|e| e.to_string().contains("listed twice"))
        );
    }

    #[test]
    fn self_dependency_is_one_cycle() {
        let tasks = vec![task("a", 1, &["a"])];
        let errors = validate_invariants(&tasks);
        assert_eq!(
            errors,
            vec![GovernanceError::Cycle {
                path: vec!["a".to_string(), "a".to_string()]
            }]
        );
    }

    #[test]
    fn ids_must_be_single_path_components() {
        for id in ["../../escaped", "phase/one", "..", ".hidden", "has space"] {
            let errors = validate_invariants(&[task(id, 1, &[])]);
            assert!(
                errors
                    .iter()
                    .any(|e| matches!(e, GovernanceError::InvalidTask { task, .. } if task == id)),
                "{id}: {errors:?}"
            );
        }
        assert!(validate_invariants(&[task("p1.t-2_b", 1, &[])]).is_empty());
    }

    #[test]
    fn zero_wave_is_invalid() {
        let tasks = vec![task("a", 0, &[])];
        let errors = validate_invariants(&tasks);
        assert!(errors.iter().any(|e| e.to_string().contains("wave must be >= 1")));
    }
}
