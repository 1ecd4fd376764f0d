//! `.warden/` scaffolding and canonical paths.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::graph::TaskGraph;
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::config::{WardenConfig, write_config};
use crate::io::state::{GovernanceState, write_state};

pub const GRAPH_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/task_graph/v1.schema.json"
));

/// All canonical paths within `.warden/` for a project root.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    pub root: PathBuf,
    pub warden_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub project_dir: PathBuf,
    pub mission_path: PathBuf,
    pub phases_dir: PathBuf,
    pub acceptance_path: PathBuf,
    pub modules_path: PathBuf,
    pub contracts_path: PathBuf,
    pub imports_path: PathBuf,
    pub schema_path: PathBuf,
    pub state_dir: PathBuf,
    pub graph_path: PathBuf,
    pub state_path: PathBuf,
    pub state_md_path: PathBuf,
    pub scars_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub decisions_path: PathBuf,
    pub rollbacks_path: PathBuf,
    pub escalations_dir: PathBuf,
    pub dispatch_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl WardenPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let warden_dir = root.join(".warden");
        let project_dir = warden_dir.join("project");
        let state_dir = warden_dir.join("state");
        let audit_dir = warden_dir.join("audit");
        Self {
            root,
            gitignore_path: warden_dir.join(".gitignore"),
            config_path: warden_dir.join("config.toml"),
            mission_path: project_dir.join("MISSION.md"),
            phases_dir: project_dir.join("phases"),
            acceptance_path: project_dir.join("acceptance.json"),
            modules_path: project_dir.join("modules.json"),
            contracts_path: project_dir.join("contracts.json"),
            imports_path: project_dir.join("imports.json"),
            project_dir,
            schema_path: warden_dir.join("schema").join("task_graph.schema.json"),
            graph_path: state_dir.join("graph.json"),
            state_path: state_dir.join("state.json"),
            state_md_path: state_dir.join("STATE.md"),
            scars_path: state_dir.join("scars.json"),
            state_dir,
            checkpoints_dir: warden_dir.join("checkpoints"),
            quarantine_dir: warden_dir.join("quarantine"),
            decisions_path: audit_dir.join("decisions.jsonl"),
            rollbacks_path: audit_dir.join("rollbacks.jsonl"),
            escalations_dir: audit_dir.join("escalations"),
            dispatch_dir: audit_dir.join("dispatch"),
            audit_dir,
            scratch_dir: warden_dir.join("scratch"),
            warden_dir,
        }
    }

    pub fn phase_path(&self, phase: &str) -> PathBuf {
        self.phases_dir.join(format!("{phase}.md"))
    }

    /// Scratch path relative to the project root, as git sees it.
    pub fn scratch_probe(&self) -> &'static str {
        ".warden/scratch/.probe"
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.warden_dir.is_dir() {
            return Err(anyhow!(
                "{} is not initialized (run `warden init`)",
                self.root.display()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite warden-owned files that already exist.
    pub force: bool,
}

/// Create `.warden/` scaffolding in `root`.
///
/// Fails if `.warden/` already exists unless `options.force` is set. With
/// `force`, the ignore file, schema, and config are rewritten; the graph,
/// governance state, and project stores are only created when missing.
pub fn init_warden(root: &Path, options: &InitOptions) -> Result<WardenPaths> {
    let paths = WardenPaths::new(root);
    if paths.warden_dir.exists() && !paths.warden_dir.is_dir() {
        return Err(anyhow!("warden init: .warden exists but is not a directory"));
    }
    if paths.warden_dir.exists() && !options.force {
        return Err(anyhow!(
            "warden init: .warden already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.warden_dir,
        &paths.project_dir,
        &paths.phases_dir,
        &paths.state_dir,
        &paths.checkpoints_dir,
        &paths.quarantine_dir,
        &paths.audit_dir,
        &paths.escalations_dir,
        &paths.dispatch_dir,
        &paths.scratch_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    write_atomic(&paths.gitignore_path, WARDEN_GITIGNORE.as_bytes())?;
    write_atomic(&paths.schema_path, GRAPH_SCHEMA.as_bytes())?;
    write_config(&paths.config_path, &WardenConfig::default())?;
    if !paths.graph_path.exists() {
        write_json_atomic(&paths.graph_path, &TaskGraph::new())?;
    }
    if !paths.state_path.exists() {
        write_state(&paths, &GovernanceState::default())?;
    }

    create_if_missing(&paths.mission_path, MISSION_PLACEHOLDER)?;
    create_if_missing(&paths.acceptance_path, "{}\n")?;
    create_if_missing(&paths.modules_path, "[]\n")?;
    create_if_missing(&paths.contracts_path, "[]\n")?;
    create_if_missing(&paths.imports_path, "{}\n")?;

    Ok(paths)
}

fn create_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    write_atomic(path, contents.as_bytes())
}

const WARDEN_GITIGNORE: &str = "state/\nscratch/\naudit/\nquarantine/\ncheckpoints/\n";
const MISSION_PLACEHOLDER: &str = "# Mission\n\nDescribe what this project exists to do.\n";

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies init creates the directory layout, schema, config, and empty graph.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_warden(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.scratch_dir.is_dir());
        assert!(paths.escalations_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.state_path.is_file());
        assert!(paths.state_md_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.schema_path).expect("schema"),
            GRAPH_SCHEMA
        );
        let gitignore = fs::read_to_string(&paths.gitignore_path).expect("gitignore");
        assert!(gitignore.lines().any(|line| line == "scratch/"));

        let graph: TaskGraph =
            serde_json::from_str(&fs::read_to_string(&paths.graph_path).expect("graph"))
                .expect("parse graph");
        assert!(graph.is_empty());
    }

    /// Verifies a second init refuses without force and keeps project stores with force.
    #[test]
    fn init_refuses_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_warden(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.mission_path, "# Mission\n\nShip billing.\n").expect("write mission");

        let err = init_warden(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        init_warden(temp.path(), &InitOptions { force: true }).expect("force init");
        let mission = fs::read_to_string(&paths.mission_path).expect("mission");
        assert!(mission.contains("Ship billing."));
    }
}
