//! Git adapter for checkpoints and rollbacks.
//!
//! Every operation shells out to `git` in the project root. The wrapper stays
//! small and explicit so each call shows up in traces with its arguments.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Fail unless the working directory is inside a git work tree.
    pub fn ensure_work_tree(&self) -> Result<()> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true" {
            return Ok(());
        }
        Err(anyhow!(
            "{} is not inside a git work tree",
            self.workdir.display()
        ))
    }

    /// True if git would ignore `path` (relative to the work tree).
    pub fn is_ignored(&self, path: &str) -> Result<bool> {
        let out = self.run(&["check-ignore", "-q", "--", path])?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(anyhow!(
                "git check-ignore {path} failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )),
        }
    }

    /// True if `path` is in the index.
    pub fn is_tracked(&self, path: &str) -> Result<bool> {
        let out = self.run(&["ls-files", "--error-unmatch", "--", path])?;
        Ok(out.status.success())
    }

    pub fn head_revision(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    pub fn revision_exists(&self, revision: &str) -> Result<bool> {
        let spec = format!("{revision}^{{commit}}");
        let out = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(out.status.success())
    }

    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage exactly the given paths, including deletions.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn stage_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// Stage everything git does not ignore.
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A", "--", "."])?;
        Ok(())
    }

    /// Paths under `dir` whose staged content differs from `revision`,
    /// relative to the workdir.
    pub fn staged_changes_under(&self, revision: &str, dir: &str) -> Result<Vec<String>> {
        let out = self.run_checked(&[
            "diff",
            "--cached",
            "--name-only",
            "--relative",
            "-z",
            revision,
            "--",
            dir,
        ])?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commit only `paths` (ignoring anything else staged); empty commits are allowed.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn commit_only(&self, message: &str, paths: &[String]) -> Result<String> {
        if paths.is_empty() {
            return self.commit_empty(message);
        }
        let mut args = vec![
            "commit",
            "--allow-empty",
            "--no-verify",
            "--only",
            "-m",
            message,
            "--",
        ];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        let revision = self.head_revision()?;
        debug!(%revision, "committed");
        Ok(revision)
    }

    /// Empty commit on top of HEAD that leaves the index untouched.
    fn commit_empty(&self, message: &str) -> Result<String> {
        let tree = self.run_capture(&["rev-parse", "HEAD^{tree}"])?;
        let revision = self
            .run_capture(&["commit-tree", tree.trim(), "-p", "HEAD", "-m", message])?
            .trim()
            .to_string();
        self.run_checked(&["update-ref", "-m", message, "HEAD", &revision])?;
        debug!(%revision, "committed empty checkpoint");
        Ok(revision)
    }

    /// Binary diff between `revision` and the index.
    pub fn diff_cached_binary(&self, revision: &str) -> Result<Vec<u8>> {
        let out = self.run_checked(&["diff", "--cached", "--binary", revision])?;
        Ok(out.stdout)
    }

    #[instrument(skip_all, fields(revision))]
    pub fn reset_hard(&self, revision: &str) -> Result<()> {
        warn!(revision, "hard reset");
        self.run_checked(&["reset", "--hard", revision])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
