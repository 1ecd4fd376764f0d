//! Pure filters that narrow project metadata to one task's touched files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::glob;
use crate::core::types::TaskStatus;
use crate::graph::TaskGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    /// Directory or file prefix the module lives under.
    pub path: String,
    /// Additional ownership globs.
    #[serde(default)]
    pub owns: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Files this file imports.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Public symbols this file exposes.
    #[serde(default)]
    pub exports: Vec<String>,
}

/// Precomputed import map keyed by file path.
pub type ImportMap = BTreeMap<String, ImportEntry>;

/// Symbols a task may call but does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSymbols {
    pub file: String,
    pub symbols: Vec<String>,
}

pub fn modules_for_files(modules: &[ModuleEntry], files: &[String]) -> Vec<ModuleEntry> {
    modules
        .iter()
        .filter(|module| {
            files.iter().any(|file| {
                let file = glob::normalize(file);
                is_path_prefix(glob::normalize(&module.path), file)
                    || module.owns.iter().any(|pattern| glob::matches(pattern, file))
            })
        })
        .cloned()
        .collect()
}

pub fn contracts_for_files(contracts: &[ContractEntry], files: &[String]) -> Vec<ContractEntry> {
    contracts
        .iter()
        .filter(|contract| {
            let contract_file = glob::normalize(&contract.file);
            files.iter().any(|file| {
                let file = glob::normalize(file);
                file == contract_file || parent(file) == parent(contract_file)
            })
        })
        .cloned()
        .collect()
}

/// Files imported by `files`, minus `files` themselves, with their exports.
pub fn imported_symbols(imports: &ImportMap, files: &[String]) -> Vec<ImportedSymbols> {
    let owned: BTreeSet<&str> = files.iter().map(|f| glob::normalize(f)).collect();
    let mut imported: BTreeSet<&str> = BTreeSet::new();
    for file in &owned {
        if let Some(entry) = imports.get(*file) {
            imported.extend(entry.imports.iter().map(|f| glob::normalize(f)));
        }
    }
    imported
        .into_iter()
        .filter(|file| !owned.contains(file))
        .map(|file| ImportedSymbols {
            file: file.to_string(),
            symbols: imports
                .get(file)
                .map(|entry| entry.exports.clone())
                .unwrap_or_default(),
        })
        .collect()
}

/// Test files in the import map that import one of `files`.
pub fn related_tests(imports: &ImportMap, files: &[String]) -> Vec<String> {
    let owned: BTreeSet<&str> = files.iter().map(|f| glob::normalize(f)).collect();
    imports
        .iter()
        .filter(|(path, _)| is_test_path(path) && !owned.contains(path.as_str()))
        .filter(|(_, entry)| {
            entry
                .imports
                .iter()
                .any(|import| owned.contains(glob::normalize(import)))
        })
        .map(|(path, _)| path.clone())
        .collect()
}

/// Files declared by other tasks of the same wave.
pub fn sibling_files(graph: &TaskGraph, task_id: &str) -> Vec<String> {
    let Some(task) = graph.get(task_id) else {
        return Vec::new();
    };
    let own: BTreeSet<&str> = task.files.iter().map(String::as_str).collect();
    let mut siblings = BTreeSet::new();
    for other in graph.tasks() {
        if other.id == task.id || other.wave != task.wave {
            continue;
        }
        for file in &other.files {
            if !own.contains(file.as_str()) {
                siblings.insert(file.clone());
            }
        }
    }
    siblings.into_iter().collect()
}

/// One line per completed task in a lower wave, most recent wave first.
pub fn prior_wave_summary(graph: &TaskGraph, wave: u32) -> String {
    let mut done: Vec<_> = graph
        .tasks()
        .iter()
        .filter(|task| task.wave < wave && task.status == TaskStatus::Completed)
        .collect();
    done.sort_by(|a, b| b.wave.cmp(&a.wave));
    done.iter()
        .map(|task| {
            let summary = task.summary.as_deref().unwrap_or(&task.description);
            format!(
                "- [wave {}] {}: {}",
                task.wave,
                task.id,
                summary.lines().next().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep at most `max` lines. Oversized input is capped silently.
pub fn truncate_lines(text: &str, max: usize) -> String {
    text.lines().take(max).collect::<Vec<_>>().join("\n")
}

/// Keep the first `max` lines of file content. Under the cap the text is
/// returned unchanged, line endings included.
pub fn cap_file_lines(text: &str, max: usize) -> String {
    text.split_inclusive('\n').take(max).collect()
}

/// Keep at most `max` entries and report how many were dropped.
pub fn cap_entries<T>(mut items: Vec<T>, max: usize) -> (Vec<T>, usize) {
    let dropped = items.len().saturating_sub(max);
    items.truncate(max);
    (items, dropped)
}

fn is_path_prefix(prefix: &str, file: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    file == prefix
        || file
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn parent(path: &str) -> &Path {
    Path::new(path).parent().unwrap_or_else(|| Path::new(""))
}

fn is_test_path(path: &str) -> bool {
    let path = Path::new(path);
    let in_test_dir = path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("tests" | "test" | "__tests__")
        )
    });
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    in_test_dir
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
}
