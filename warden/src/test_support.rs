//! Test-only fixtures: task builders, a throwaway git repo, scripted backends.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::judge::VerificationResult;
use crate::graph::{Task, TaskGraph};
use crate::io::config::{WardenConfig, load_config, write_config};
use crate::io::graph_store::write_graph;
use crate::io::init::{InitOptions, WardenPaths, init_warden};
use crate::io::verifier::{Verifier, VerifyRequest};
use crate::io::worker::{Worker, WorkerRequest, WorkerRun};

/// Pending task in phase `p1` touching no files.
pub fn task(id: &str, wave: u32, deps: &[&str]) -> Task {
    let mut task = Task::new(id, "p1", format!("{id} description"), wave);
    task.depends_on = deps.iter().map(|dep| dep.to_string()).collect();
    task
}

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Git repository in a temp dir with one commit and `.warden/` initialized.
pub struct TestRepo {
    dir: TempDir,
    pub paths: WardenPaths,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let root = dir.path().to_path_buf();
        git(&root, &["init", "-q"])?;
        git(&root, &["config", "user.email", "warden@example.com"])?;
        git(&root, &["config", "user.name", "Warden Test"])?;
        git(&root, &["config", "commit.gpgsign", "false"])?;
        fs::write(root.join("README.md"), "# fixture\n").context("write README.md")?;
        let paths = init_warden(&root, &InitOptions { force: false })?;
        git(&root, &["add", "-A"])?;
        git(&root, &["commit", "-q", "-m", "initial"])?;
        Ok(Self { dir, paths })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        git(self.path(), args)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    pub fn write_tasks(&self, tasks: Vec<Task>) -> Result<TaskGraph> {
        let graph = TaskGraph::from_tasks(tasks)?;
        write_graph(&self.paths, &graph)?;
        Ok(graph)
    }

    pub fn update_config(&self, edit: impl FnOnce(&mut WardenConfig)) -> Result<()> {
        let mut config = load_config(&self.paths.config_path)?;
        edit(&mut config);
        write_config(&self.paths.config_path, &config)
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Canned worker behaviour for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    pub run: WorkerRun,
    /// Files written into the workdir before returning.
    pub writes: Vec<(String, String)>,
}

impl ScriptedRun {
    pub fn complete(summary: &str, files: &[&str]) -> Self {
        let payload = serde_json::json!({ "filesModified": files, "summary": summary });
        Self::stdout(&format!("working...\n<<COMPLETE>>{payload}<</COMPLETE>>\n"))
    }

    pub fn blocked(reason: &str) -> Self {
        let payload = serde_json::json!({ "reason": reason });
        Self::stdout(&format!("<<BLOCKED>>{payload}<</BLOCKED>>\n"))
    }

    pub fn stdout(text: &str) -> Self {
        Self {
            run: WorkerRun {
                stdout: text.to_string(),
                exit_code: Some(0),
                ..WorkerRun::default()
            },
            writes: Vec::new(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            run: WorkerRun {
                timed_out: true,
                ..WorkerRun::default()
            },
            writes: Vec::new(),
        }
    }

    pub fn writing(mut self, rel: &str, contents: &str) -> Self {
        self.writes.push((rel.to_string(), contents.to_string()));
        self
    }
}

/// Worker returning queued runs per task id, recording every call.
#[derive(Default)]
pub struct ScriptedWorker {
    scripts: Mutex<BTreeMap<String, VecDeque<ScriptedRun>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: &str, run: ScriptedRun) -> &Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(task_id.to_string())
            .or_default()
            .push_back(run);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, task_id: &str) -> usize {
        self.calls().iter().filter(|id| *id == task_id).count()
    }
}

impl Worker for ScriptedWorker {
    fn run(&self, request: &WorkerRequest) -> Result<WorkerRun> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.task_id.clone());
        let scripted = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&request.task_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted run left for task {}", request.task_id))?;
        for (rel, contents) in &scripted.writes {
            let path: PathBuf = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(scripted.run)
    }
}

/// Verifier returning queued results per task; passes when the queue is empty.
#[derive(Default)]
pub struct ScriptedVerifier {
    results: Mutex<BTreeMap<String, VecDeque<Result<VerificationResult, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: &str, result: VerificationResult) -> &Self {
        self.enqueue(task_id, Ok(result))
    }

    pub fn push_error(&self, task_id: &str, message: &str) -> &Self {
        self.enqueue(task_id, Err(message.to_string()))
    }

    fn enqueue(&self, task_id: &str, result: Result<VerificationResult, String>) -> &Self {
        self.results
            .lock()
            .expect("results lock")
            .entry(task_id.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerificationResult> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.task.id.clone());
        let next = self
            .results
            .lock()
            .expect("results lock")
            .get_mut(&request.task.id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(VerificationResult::passing()),
        }
    }
}
