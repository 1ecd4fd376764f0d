//! Scars: human-confirmed root causes of past rollbacks and the prevention
//! rules derived from them.
//!
//! Stored as a JSON array in `.warden/state/scars.json`. Scars are never
//! deleted; consolidation only marks duplicates as folded into an older scar.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GovernanceError;
use crate::io::atomic::write_json_atomic;
use crate::io::audit::read_rollbacks;
use crate::io::init::WardenPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scar {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    /// Rollback this scar explains.
    pub checkpoint_id: String,
    pub task_id: String,
    pub failure: String,
    pub root_cause: String,
    /// Standing constraint shown to every later worker.
    pub rule: String,
    pub confirmed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidated_into: Option<String>,
}

impl Scar {
    pub fn is_active(&self) -> bool {
        self.consolidated_into.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ScarInput {
    pub checkpoint_id: String,
    pub failure: String,
    pub root_cause: String,
    pub rule: String,
    /// Name of the human confirming the root cause.
    pub confirmed_by: String,
}

pub fn load_scars(paths: &WardenPaths) -> Result<Vec<Scar>> {
    let path = &paths.scars_path;
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Append a scar for a rollback that actually happened.
pub fn record_scar(paths: &WardenPaths, input: &ScarInput, at: DateTime<Utc>) -> Result<Scar> {
    if input.confirmed_by.trim().is_empty() {
        return Err(GovernanceError::Precondition(
            "scar requires a human confirmation (--confirmed-by)".to_string(),
        )
        .into());
    }
    if input.rule.trim().is_empty() {
        return Err(GovernanceError::Precondition("scar rule must not be empty".to_string()).into());
    }
    let rollback = read_rollbacks(paths)?
        .into_iter()
        .rev()
        .find(|entry| entry.checkpoint_id == input.checkpoint_id)
        .ok_or_else(|| {
            GovernanceError::Precondition(format!(
                "no rollback of checkpoint '{}' is recorded; scars capture rollbacks only",
                input.checkpoint_id
            ))
        })?;

    let mut scars = load_scars(paths)?;
    let scar = Scar {
        id: format!("scar-{:04}", scars.len() + 1),
        recorded_at: at,
        checkpoint_id: input.checkpoint_id.clone(),
        task_id: rollback.task_id,
        failure: input.failure.trim().to_string(),
        root_cause: input.root_cause.trim().to_string(),
        rule: input.rule.trim().to_string(),
        confirmed_by: input.confirmed_by.trim().to_string(),
        consolidated_into: None,
    };
    scars.push(scar.clone());
    write_json_atomic(&paths.scars_path, &scars)?;
    info!(scar = %scar.id, checkpoint = %scar.checkpoint_id, "scar recorded");
    Ok(scar)
}

/// Fold active scars sharing a rule into the oldest one.
///
/// Returns `(folded, survivor)` pairs for the scars changed by this call.
pub fn consolidate(paths: &WardenPaths) -> Result<Vec<(String, String)>> {
    let mut scars = load_scars(paths)?;
    let merged = consolidate_scars(&mut scars);
    if !merged.is_empty() {
        write_json_atomic(&paths.scars_path, &scars)?;
    }
    debug!(merged = merged.len(), "scars consolidated");
    Ok(merged)
}

fn consolidate_scars(scars: &mut [Scar]) -> Vec<(String, String)> {
    let mut survivors: BTreeMap<String, String> = BTreeMap::new();
    let mut merged = Vec::new();
    for scar in scars.iter_mut().filter(|scar| scar.is_active()) {
        let key = normalize_rule(&scar.rule);
        match survivors.get(&key) {
            Some(survivor) => {
                scar.consolidated_into = Some(survivor.clone());
                merged.push((scar.id.clone(), survivor.clone()));
            }
            None => {
                survivors.insert(key, scar.id.clone());
            }
        }
    }
    merged
}

/// Prevention-rule lines for active scars, oldest first.
pub fn active_rules(scars: &[Scar]) -> Vec<String> {
    scars
        .iter()
        .filter(|scar| scar.is_active())
        .map(|scar| format!("- {} ({})", scar.rule, scar.id))
        .collect()
}

fn normalize_rule(rule: &str) -> String {
    rule.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_string()
}
