//! Checkpoints: reversible git snapshots plus a digest of coordination state.
//!
//! Records live in `.warden/checkpoints/<id>.json`. Pruning removes records
//! only; the commits they reference stay in git history.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::error::GovernanceError;
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::audit::{RollbackEntry, append_rollback, path_component};
use crate::io::git::Git;
use crate::io::init::WardenPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub seq: u32,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    /// Commit the working tree is reset to on rollback.
    pub revision: String,
    pub description: String,
    /// Files committed into the checkpoint.
    pub files: Vec<String>,
    /// sha256 over the snapshot, hex encoded.
    pub state_digest: String,
    pub snapshot: StateSnapshot,
}

/// Raw coordination-state files at checkpoint time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub graph: Option<String>,
    pub state: Option<String>,
}

impl StateSnapshot {
    fn capture(paths: &WardenPaths) -> Result<Self> {
        Ok(Self {
            graph: read_optional(&paths.graph_path)?,
            state: read_optional(&paths.state_path)?,
        })
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.graph, &self.state] {
            match part {
                Some(text) => {
                    hasher.update(b"1");
                    hasher.update((text.len() as u64).to_le_bytes());
                    hasher.update(text.as_bytes());
                }
                None => hasher.update(b"0"),
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub checkpoint_id: String,
    pub revision: String,
    /// Patch holding every change discarded by the reset.
    pub quarantine: PathBuf,
    pub quarantined_bytes: usize,
}

pub struct CheckpointManager {
    paths: WardenPaths,
    git: Git,
}

impl CheckpointManager {
    pub fn new(paths: &WardenPaths) -> Self {
        Self {
            paths: paths.clone(),
            git: Git::new(&paths.root),
        }
    }

    /// Refuse to operate outside git or with an unignored scratch directory.
    pub fn preflight(&self) -> Result<()> {
        self.git
            .ensure_work_tree()
            .map_err(|err| GovernanceError::Precondition(format!("checkpoint: {err}")))?;
        if !self.git.is_ignored(self.paths.scratch_probe())? {
            return Err(GovernanceError::Precondition(
                "checkpoint: .warden/scratch/ is not ignored by git (add it to .gitignore)"
                    .to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Commit exactly `files` and persist a checkpoint record.
    #[instrument(skip_all, fields(task = task_id, files = files.len()))]
    pub fn create(
        &self,
        task_id: &str,
        description: &str,
        files: &[String],
        at: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        self.preflight()?;

        let mut staged = Vec::new();
        for file in files {
            if self.paths.root.join(file).exists() || self.git.is_tracked(file)? {
                staged.push(file.clone());
            } else {
                debug!(file, "declared file does not exist yet, not staged");
            }
        }
        self.git.stage_paths(&staged)?;

        let seq = self.next_seq()?;
        let id = format!("cp-{seq:04}-{}", path_component(task_id));
        let message = format!("warden checkpoint {id}: {description}");
        let revision = self
            .git
            .commit_only(&message, &staged)
            .with_context(|| format!("commit checkpoint {id}"))?;

        let snapshot = StateSnapshot::capture(&self.paths)?;
        let checkpoint = Checkpoint {
            id: id.clone(),
            seq,
            task_id: task_id.to_string(),
            created_at: at,
            revision,
            description: description.to_string(),
            files: staged,
            state_digest: snapshot.digest(),
            snapshot,
        };
        write_json_atomic(&self.record_path(&id), &checkpoint)?;
        info!(checkpoint = %id, revision = %checkpoint.revision, "checkpoint created");
        Ok(checkpoint)
    }

    /// Quarantine the current difference, then hard-reset to the checkpoint.
    ///
    /// Never retried. Failures surface as [`GovernanceError::RollbackFailure`]
    /// carrying the quarantine location.
    #[instrument(skip_all, fields(checkpoint = checkpoint_id))]
    pub fn rollback(&self, checkpoint_id: &str, at: DateTime<Utc>) -> Result<RollbackReport> {
        let checkpoint = self.get(checkpoint_id)?;
        self.preflight()?;
        if !self.git.revision_exists(&checkpoint.revision)? {
            return Err(GovernanceError::Precondition(format!(
                "checkpoint {checkpoint_id} references missing revision {}",
                checkpoint.revision
            ))
            .into());
        }

        let quarantine = self.paths.quarantine_dir.join(format!(
            "{}-{}.patch",
            checkpoint.id,
            at.format("%Y%m%dT%H%M%S%.3fZ")
        ));
        let dirty = self.git.status_porcelain().map(|e| e.len()).unwrap_or(0);
        debug!(dirty, "quarantining working tree changes");

        let result = self
            .quarantine_changes(&checkpoint.revision, &quarantine)
            .and_then(|bytes| {
                let kept = self.capture_warden_files(&checkpoint.revision)?;
                self.git.reset_hard(&checkpoint.revision)?;
                self.restore_warden_files(&kept)?;
                Ok(bytes)
            });

        let entry = RollbackEntry {
            at,
            checkpoint_id: checkpoint.id.clone(),
            task_id: checkpoint.task_id.clone(),
            revision: checkpoint.revision.clone(),
            quarantine: quarantine.clone(),
            succeeded: result.is_ok(),
            error: result.as_ref().err().map(|err| format!("{err:#}")),
        };
        append_rollback(&self.paths, &entry)?;

        match result {
            Ok(quarantined_bytes) => {
                info!(
                    checkpoint = %checkpoint.id,
                    quarantine = %quarantine.display(),
                    "rolled back"
                );
                Ok(RollbackReport {
                    checkpoint_id: checkpoint.id,
                    revision: checkpoint.revision,
                    quarantine,
                    quarantined_bytes,
                })
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "rollback failed");
                Err(GovernanceError::RollbackFailure {
                    checkpoint: checkpoint.id,
                    quarantine,
                    detail: format!("{err:#}"),
                }
                .into())
            }
        }
    }

    /// Delete the oldest records beyond `keep`. Returns removed ids.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let all = self.list()?;
        let excess = all.len().saturating_sub(keep);
        let mut removed = Vec::new();
        for checkpoint in all.into_iter().take(excess) {
            let path = self.record_path(&checkpoint.id);
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            removed.push(checkpoint.id);
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), keep, "pruned checkpoint records");
        }
        Ok(removed)
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let dir = &self.paths.checkpoints_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry
                .with_context(|| format!("read entry in {}", dir.display()))?
                .path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            checkpoints.push(read_record(&path)?);
        }
        checkpoints.sort_by_key(|checkpoint| checkpoint.seq);
        Ok(checkpoints)
    }

    pub fn get(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let path = self.record_path(checkpoint_id);
        if !path.exists() {
            return Err(anyhow!("unknown checkpoint '{checkpoint_id}'"));
        }
        read_record(&path)
    }

    /// Put graph and state files back to their checkpoint contents.
    pub fn restore_snapshot(&self, checkpoint_id: &str) -> Result<()> {
        let checkpoint = self.get(checkpoint_id)?;
        if checkpoint.snapshot.digest() != checkpoint.state_digest {
            return Err(anyhow!(
                "checkpoint {checkpoint_id} snapshot does not match its digest"
            ));
        }
        if let Some(graph) = &checkpoint.snapshot.graph {
            write_atomic(&self.paths.graph_path, graph.as_bytes())?;
        }
        if let Some(state) = &checkpoint.snapshot.state {
            write_atomic(&self.paths.state_path, state.as_bytes())?;
        }
        info!(checkpoint = checkpoint_id, "coordination state restored");
        Ok(())
    }

    /// Stage everything, including tracked `.warden/` files, and save the diff.
    fn quarantine_changes(&self, revision: &str, quarantine: &Path) -> Result<usize> {
        self.git.add_all()?;
        let patch = self.git.diff_cached_binary(revision)?;
        write_atomic(quarantine, &patch)?;
        Ok(patch.len())
    }

    /// Current contents of every non-ignored `.warden/` file the reset would touch.
    /// `None` marks a file absent from the working tree.
    fn capture_warden_files(&self, revision: &str) -> Result<Vec<(PathBuf, Option<Vec<u8>>)>> {
        let mut kept = Vec::new();
        for rel in self.git.staged_changes_under(revision, WARDEN_DIR)? {
            let path = self.paths.root.join(&rel);
            let contents = match fs::read(&path) {
                Ok(bytes) => Some(bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
            };
            kept.push((path, contents));
        }
        Ok(kept)
    }

    fn restore_warden_files(&self, kept: &[(PathBuf, Option<Vec<u8>>)]) -> Result<()> {
        for (path, contents) in kept {
            match contents {
                Some(bytes) => write_atomic(path, bytes)?,
                None if path.exists() => fs::remove_file(path)
                    .with_context(|| format!("remove {}", path.display()))?,
                None => {}
            }
        }
        if !kept.is_empty() {
            debug!(files = kept.len(), "kept .warden files across reset");
        }
        Ok(())
    }

    fn next_seq(&self) -> Result<u32> {
        Ok(self
            .list()?
            .last()
            .map_or(1, |checkpoint| checkpoint.seq + 1))
    }

    fn record_path(&self, checkpoint_id: &str) -> PathBuf {
        self.paths
            .checkpoints_dir
            .join(format!("{checkpoint_id}.json"))
    }
}

const WARDEN_DIR: &str = ".warden";

fn read_record(path: &Path) -> Result<Checkpoint> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
