//! Append-only audit trail under `.warden/audit/`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::escalation::EscalationRecord;
use crate::core::judge::MergeDecision;
use crate::io::atomic::{append_jsonl, read_jsonl, write_json_atomic};
use crate::io::init::WardenPaths;

/// Per-dispatch audit directory: `audit/dispatch/<run>/<cycle>/<task>/`.
#[derive(Debug, Clone)]
pub struct DispatchAudit {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub packet_path: PathBuf,
    pub output_path: PathBuf,
    pub outcome_path: PathBuf,
    pub verification_path: PathBuf,
    pub verifier_log_path: PathBuf,
}

impl DispatchAudit {
    pub fn new(paths: &WardenPaths, run_id: &str, cycle: u32, task_id: &str) -> Self {
        let dir = paths
            .dispatch_dir
            .join(run_id)
            .join(cycle.to_string())
            .join(path_component(task_id));
        Self::in_dir(dir)
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            prompt_path: dir.join("prompt.md"),
            packet_path: dir.join("packet.json"),
            output_path: dir.join("output.log"),
            outcome_path: dir.join("outcome.json"),
            verification_path: dir.join("verification.json"),
            verifier_log_path: dir.join("verifier.log"),
            dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub at: DateTime<Utc>,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub decision: MergeDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub at: DateTime<Utc>,
    pub checkpoint_id: String,
    pub task_id: String,
    pub revision: String,
    pub quarantine: PathBuf,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn append_decision(paths: &WardenPaths, entry: &DecisionEntry) -> Result<()> {
    debug!(task = %entry.task_id, verdict = entry.decision.verdict.as_str(), "recording decision");
    append_jsonl(&paths.decisions_path, entry)
}

pub fn read_decisions(paths: &WardenPaths) -> Result<Vec<DecisionEntry>> {
    read_jsonl(&paths.decisions_path)
}

pub fn append_rollback(paths: &WardenPaths, entry: &RollbackEntry) -> Result<()> {
    append_jsonl(&paths.rollbacks_path, entry)
}

pub fn read_rollbacks(paths: &WardenPaths) -> Result<Vec<RollbackEntry>> {
    read_jsonl(&paths.rollbacks_path)
}

pub fn escalation_path(paths: &WardenPaths, task_id: &str) -> PathBuf {
    paths
        .escalations_dir
        .join(format!("{}.json", path_component(task_id)))
}

/// Write the escalation record for a task, replacing any earlier one.
pub fn write_escalation(paths: &WardenPaths, record: &EscalationRecord) -> Result<PathBuf> {
    let path = escalation_path(paths, &record.task_id);
    write_json_atomic(&path, record)?;
    Ok(path)
}

/// `id` as a single file-name component: anything outside `[A-Za-z0-9._-]`
/// and a leading `.` become `-`.
pub(crate) fn path_component(id: &str) -> String {
    id.chars()
        .enumerate()
        .map(|(i, c)| match c {
            '.' if i == 0 => '-',
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '-',
        })
        .collect()
}

/// Path relative to the project root when possible, for evidence lists.
pub fn display_path(paths: &WardenPaths, path: &Path) -> String {
    path.strip_prefix(&paths.root)
        .unwrap_or(path)
        .display()
        .to_string()
}
