//! Context packet builder: the bounded, task-scoped bundle a worker sees.
//!
//! Each slot reads its own source and never another slot's result, so all of
//! them are computed concurrently on scoped threads. Oversized sources are
//! capped by truncation; list slots record how many entries they dropped in
//! [`ContextPacket::omitted`]. Missing project stores produce empty slots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::thread;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::filter::{
    self, ContractEntry, ImportMap, ImportedSymbols, ModuleEntry, cap_entries, cap_file_lines,
    truncate_lines,
};
use crate::core::types::{RiskTier, TestMode};
use crate::graph::{Task, TaskGraph};
use crate::io::config::WardenConfig;
use crate::io::init::WardenPaths;
use crate::io::scars::{active_rules, load_scars};
use crate::io::state::{GovernanceState, render_state_markdown};

pub const MISSION_MAX_LINES: usize = 20;
pub const PHASE_MAX_LINES: usize = 15;
pub const ACCEPTANCE_MAX_LINES: usize = 50;
pub const RULES_MAX_LINES: usize = 30;
pub const PRIOR_WAVE_MAX_LINES: usize = 30;
pub const STATE_MAX_LINES: usize = 150;
pub const FILE_MAX_LINES: usize = 400;
/// Line budget shared by all file bodies in one packet.
pub const FILES_MAX_TOTAL_LINES: usize = 2_000;
pub const MODULES_MAX_ENTRIES: usize = 20;
pub const CONTRACTS_MAX_ENTRIES: usize = 40;
pub const IMPORTED_MAX_FILES: usize = 30;
pub const IMPORTED_MAX_SYMBOLS: usize = 25;
pub const RELATED_TESTS_MAX_ENTRIES: usize = 20;
pub const FORBIDDEN_MAX_ENTRIES: usize = 100;

/// Body given to an existing file once the packet's line budget is spent.
pub const CONTENT_WITHHELD: &str =
    "[content withheld: packet file budget reached; read the file directly]\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPacket {
    pub task_id: String,
    pub description: String,
    pub phase: String,
    pub wave: u32,
    pub risk: RiskTier,
    pub test_mode: TestMode,

    pub mission: String,
    pub phase_objective: String,
    /// Exactly the task's declared files.
    pub files: Vec<String>,
    /// One entry per file, byte-exact up to the line cap; empty content
    /// means "create this file".
    pub files_content: BTreeMap<String, String>,
    /// Declared files that do not exist yet.
    #[serde(default)]
    pub new_files: Vec<String>,
    pub acceptance: String,
    pub modules: Vec<ModuleEntry>,
    pub contracts: Vec<ContractEntry>,
    pub imported_symbols: Vec<ImportedSymbols>,
    pub related_tests: Vec<String>,
    pub prior_wave: String,
    pub prevention_rules: String,
    pub state_digest: String,
    pub forbidden: Vec<String>,
    pub tools: Vec<ToolCommand>,
    /// Entries dropped per capped slot, keyed by slot name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub omitted: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct FileSlot {
    content: BTreeMap<String, String>,
    new_files: Vec<String>,
    withheld: usize,
}

/// Assemble the packet for `task_id` from the graph, state, and project stores.
#[instrument(skip_all, fields(task = task_id))]
pub fn build_packet(
    paths: &WardenPaths,
    config: &WardenConfig,
    graph: &TaskGraph,
    state: &GovernanceState,
    task_id: &str,
) -> Result<ContextPacket> {
    let task = graph
        .get(task_id)
        .ok_or_else(|| anyhow!("unknown task '{task_id}'"))?;
    let files = &task.files;

    let packet = thread::scope(|scope| -> Result<ContextPacket> {
        let mission = scope.spawn(|| {
            read_text(&paths.mission_path).map(|text| truncate_lines(&text, MISSION_MAX_LINES))
        });
        let phase_objective = scope.spawn(|| {
            read_text(&paths.phase_path(&task.phase))
                .map(|text| truncate_lines(&text, PHASE_MAX_LINES))
        });
        let files_content = scope.spawn(|| read_files(&paths.root, files));
        let acceptance = scope.spawn(|| acceptance_slot(paths, task));
        let modules = scope.spawn(|| {
            read_json::<Vec<ModuleEntry>>(&paths.modules_path).map(|modules| {
                cap_entries(
                    filter::modules_for_files(&modules, files),
                    MODULES_MAX_ENTRIES,
                )
            })
        });
        let contracts = scope.spawn(|| {
            read_json::<Vec<ContractEntry>>(&paths.contracts_path).map(|contracts| {
                cap_entries(
                    filter::contracts_for_files(&contracts, files),
                    CONTRACTS_MAX_ENTRIES,
                )
            })
        });
        let imported = scope.spawn(|| {
            read_json::<ImportMap>(&paths.imports_path)
                .map(|imports| imported_slot(filter::imported_symbols(&imports, files)))
        });
        let tests = scope.spawn(|| {
            read_json::<ImportMap>(&paths.imports_path).map(|imports| {
                cap_entries(
                    filter::related_tests(&imports, files),
                    RELATED_TESTS_MAX_ENTRIES,
                )
            })
        });
        let prior_wave = scope.spawn(|| {
            truncate_lines(
                &filter::prior_wave_summary(graph, task.wave),
                PRIOR_WAVE_MAX_LINES,
            )
        });
        let rules = scope.spawn(|| {
            load_scars(paths)
                .map(|scars| truncate_lines(&active_rules(&scars).join("\n"), RULES_MAX_LINES))
        });
        let state_digest =
            scope.spawn(|| truncate_lines(&render_state_markdown(state), STATE_MAX_LINES));
        let forbidden = scope.spawn(|| {
            let mut forbidden = config.forbidden.clone();
            for file in filter::sibling_files(graph, &task.id) {
                if !forbidden.contains(&file) {
                    forbidden.push(file);
                }
            }
            cap_entries(forbidden, FORBIDDEN_MAX_ENTRIES)
        });
        let tools = scope.spawn(|| tool_commands(config, task.test_mode));

        let file_slot = join_slot(files_content, "file contents")??;
        let (modules, modules_dropped) = join_slot(modules, "modules")??;
        let (contracts, contracts_dropped) = join_slot(contracts, "contracts")??;
        let (imported_symbols, imported_dropped) = join_slot(imported, "imported symbols")??;
        let (related_tests, tests_dropped) = join_slot(tests, "related tests")??;
        let (forbidden, forbidden_dropped) = join_slot(forbidden, "forbidden")?;

        let omitted: BTreeMap<String, usize> = [
            ("filesContent", file_slot.withheld),
            ("modules", modules_dropped),
            ("contracts", contracts_dropped),
            ("importedSymbols", imported_dropped),
            ("relatedTests", tests_dropped),
            ("forbidden", forbidden_dropped),
        ]
        .into_iter()
        .filter(|(_, dropped)| *dropped > 0)
        .map(|(slot, dropped)| (slot.to_string(), dropped))
        .collect();

        Ok(ContextPacket {
            task_id: task.id.clone(),
            description: task.description.clone(),
            phase: task.phase.clone(),
            wave: task.wave,
            risk: task.risk,
            test_mode: task.test_mode,
            mission: join_slot(mission, "mission")??,
            phase_objective: join_slot(phase_objective, "phase objective")??,
            files: files.clone(),
            files_content: file_slot.content,
            new_files: file_slot.new_files,
            acceptance: join_slot(acceptance, "acceptance")??,
            modules,
            contracts,
            imported_symbols,
            related_tests,
            prior_wave: join_slot(prior_wave, "prior wave")?,
            prevention_rules: join_slot(rules, "prevention rules")??,
            state_digest: join_slot(state_digest, "state digest")?,
            forbidden,
            tools: join_slot(tools, "tools")?,
            omitted,
        })
    })?;

    if !packet.omitted.is_empty() {
        warn!(omitted = ?packet.omitted, "context slots truncated");
    }
    debug!(
        files = packet.files.len(),
        modules = packet.modules.len(),
        contracts = packet.contracts.len(),
        forbidden = packet.forbidden.len(),
        "context packet built"
    );
    Ok(packet)
}

fn join_slot<T>(handle: thread::ScopedJoinHandle<'_, T>, slot: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("context slot '{slot}' panicked"))
}

fn read_files(root: &Path, files: &[String]) -> Result<FileSlot> {
    let mut slot = FileSlot::default();
    let mut budget = FILES_MAX_TOTAL_LINES;
    for file in files {
        let content = if is_contained(file) {
            match fs::read(root.join(file)) {
                Ok(_) if budget == 0 => {
                    slot.withheld += 1;
                    CONTENT_WITHHELD.to_string()
                }
                Ok(bytes) => {
                    let text = cap_file_lines(
                        &String::from_utf8_lossy(&bytes),
                        FILE_MAX_LINES.min(budget),
                    );
                    budget -= text.split_inclusive('\n').count();
                    text
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    slot.new_files.push(file.clone());
                    String::new()
                }
                Err(err) => return Err(err).with_context(|| format!("read {file}")),
            }
        } else {
            warn!(file, "declared file escapes the project root, content withheld");
            String::new()
        };
        slot.content.insert(file.clone(), content);
    }
    Ok(slot)
}

fn imported_slot(mut imported: Vec<ImportedSymbols>) -> (Vec<ImportedSymbols>, usize) {
    for entry in &mut imported {
        let (symbols, dropped) =
            cap_entries(std::mem::take(&mut entry.symbols), IMPORTED_MAX_SYMBOLS);
        entry.symbols = symbols;
        if dropped > 0 {
            entry.symbols.push(format!("(+{dropped} more)"));
        }
    }
    cap_entries(imported, IMPORTED_MAX_FILES)
}

/// Relative path that stays inside the project root.
fn is_contained(file: &str) -> bool {
    Path::new(file)
        .components()
        .all(|part| matches!(part, Component::Normal(_) | Component::CurDir))
}

fn acceptance_slot(paths: &WardenPaths, task: &Task) -> Result<String> {
    if task.acceptance.is_empty() {
        return Ok(String::new());
    }
    let criteria: BTreeMap<String, String> = read_json(&paths.acceptance_path)?;
    let lines: Vec<String> = task
        .acceptance
        .iter()
        .map(|id| match criteria.get(id) {
            Some(text) => format!("- {id}: {}", text.trim()),
            None => format!("- {id}"),
        })
        .collect();
    Ok(truncate_lines(&lines.join("\n"), ACCEPTANCE_MAX_LINES))
}

fn tool_commands(config: &WardenConfig, test_mode: TestMode) -> Vec<ToolCommand> {
    let tools = &config.tools;
    let test = match test_mode {
        TestMode::Skip => None,
        TestMode::Hard | TestMode::Standard => tools.test.as_ref(),
    };
    [
        ("build", tools.build.as_ref()),
        ("test", test),
        ("lint", tools.lint.as_ref()),
    ]
    .into_iter()
    .filter_map(|(name, command)| {
        command.map(|command| ToolCommand {
            name: name.to_string(),
            command: command.clone(),
        })
    })
    .collect()
}

fn read_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

/// Parse a JSON store; a missing or blank file yields the type's default.
fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    let text = read_text(path)?;
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
