//! Worker backends.
//!
//! The [`Worker`] trait decouples dispatch from the process that actually edits
//! code. Tests use scripted workers that return canned output without
//! spawning anything.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::process::{CancelFlag, SupervisorOptions, supervise};

#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub task_id: String,
    pub workdir: PathBuf,
    /// Rendered prompt, written verbatim to the worker's stdin.
    pub prompt: String,
    pub timeout: Duration,
    pub grace: Duration,
    pub output_limit_bytes: usize,
    pub cancel: Option<CancelFlag>,
}

/// What a worker process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Truncation notices appended to the audit log.
    pub notices: String,
}

impl WorkerRun {
    /// Raw output as persisted to `output.log`.
    pub fn log(&self) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&self.stdout);
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&self.stderr);
        buf.push_str(&self.notices);
        buf.push_str(&format!(
            "\n=== exit ===\ncode={:?} timed_out={} cancelled={}\n",
            self.exit_code, self.timed_out, self.cancelled
        ));
        buf
    }
}

/// Abstraction over worker backends. Shared across dispatch threads.
pub trait Worker: Sync {
    fn run(&self, request: &WorkerRequest) -> Result<WorkerRun>;
}

/// Worker that spawns the configured command with the prompt on stdin.
pub struct CommandWorker {
    argv: Vec<String>,
}

impl CommandWorker {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("worker command must not be empty"));
        }
        Ok(Self { argv })
    }
}

impl Worker for CommandWorker {
    #[instrument(skip_all, fields(task = %request.task_id, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &WorkerRequest) -> Result<WorkerRun> {
        info!(program = %self.argv[0], "starting worker");
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .current_dir(&request.workdir)
            .env("WARDEN_TASK_ID", &request.task_id);

        let output = supervise(
            cmd,
            Some(request.prompt.as_bytes()),
            &SupervisorOptions {
                timeout: request.timeout,
                grace: request.grace,
                output_limit_bytes: request.output_limit_bytes,
                cancel: request.cancel.clone(),
            },
        )
        .with_context(|| format!("run worker {}", self.argv[0]))?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                state = %output.final_state(),
                "worker timed out"
            );
        }
        let mut notices = output.stdout_truncated_notice("worker");
        notices.push_str(&output.stderr_truncated_notice("worker"));
        Ok(WorkerRun {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            cancelled: output.cancelled,
            notices,
        })
    }
}
