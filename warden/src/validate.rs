//! Validation for `.warden/` layout, config, and the task graph.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::io::checkpoint::CheckpointManager;
use crate::io::config::load_config;
use crate::io::graph_store::check_graph;
use crate::io::init::WardenPaths;

/// High-level validation outcome for a layout that passed every hard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub tasks: usize,
    pub waves: usize,
    /// Why checkpoints cannot be taken yet, if they cannot.
    pub checkpoint_warning: Option<String>,
}

/// Validate `.warden/` layout, config, and graph; every graph problem is reported at once.
pub fn validate_warden(root: &Path) -> Result<ValidateOutcome> {
    let paths = WardenPaths::new(root);

    ensure_dir(&paths.warden_dir)?;
    ensure_dir(&paths.project_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_file(&paths.gitignore_path)?;
    ensure_file(&paths.config_path)?;
    ensure_file(&paths.schema_path)?;
    ensure_file(&paths.graph_path)?;
    ensure_gitignore(&paths.gitignore_path)?;

    load_config(&paths.config_path).with_context(|| "load config.toml")?;

    let check = check_graph(&paths).with_context(|| "check graph.json")?;
    if !check.is_valid() {
        let mut problems: Vec<String> = check
            .schema_errors
            .iter()
            .map(|err| format!("schema: {err}"))
            .collect();
        problems.extend(check.violations.iter().map(ToString::to_string));
        return Err(anyhow!(
            "invalid task graph {}:\n- {}",
            paths.graph_path.display(),
            problems.join("\n- ")
        ));
    }
    let tasks = check.tasks.unwrap_or_default();
    let mut waves: Vec<u32> = tasks.iter().map(|task| task.wave).collect();
    waves.sort_unstable();
    waves.dedup();

    let checkpoint_warning = CheckpointManager::new(&paths)
        .preflight()
        .err()
        .map(|err| err.to_string());
    debug!(tasks = tasks.len(), waves = waves.len(), "layout valid");

    Ok(ValidateOutcome {
        tasks: tasks.len(),
        waves: waves.len(),
        checkpoint_warning,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for required in ["state/", "scratch/", "audit/", "quarantine/"] {
        if !contents.lines().any(|line| line.trim() == required) {
            return Err(anyhow!("missing '{}' in {}", required, path.display()));
        }
    }
    Ok(())
}
