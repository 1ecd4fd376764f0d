//! Verification backends producing a [`VerificationResult`] for a completed task.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::judge::VerificationResult;
use crate::core::signal::CompletePayload;
use crate::graph::Task;
use crate::io::atomic::write_atomic;
use crate::io::process::{SupervisorOptions, supervise};

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
    pub task: Task,
    pub completion: CompletePayload,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Raw verifier output is written here.
    pub log_path: PathBuf,
}

/// JSON document handed to a verifier command on stdin.
#[derive(Debug, Serialize)]
struct VerifyInput<'a> {
    task: &'a Task,
    completion: &'a CompletePayload,
}

pub trait Verifier: Sync {
    fn verify(&self, request: &VerifyRequest) -> Result<VerificationResult>;
}

/// Runs the configured verifier command and parses its stdout.
pub struct CommandVerifier {
    argv: Vec<String>,
}

impl CommandVerifier {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("verifier command must not be empty"));
        }
        Ok(Self { argv })
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(task = %request.task.id))]
    fn verify(&self, request: &VerifyRequest) -> Result<VerificationResult> {
        let input = serde_json::to_vec(&VerifyInput {
            task: &request.task,
            completion: &request.completion,
        })
        .context("serialize verifier input")?;

        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).current_dir(&request.workdir);
        let output = supervise(
            cmd,
            Some(&input),
            &SupervisorOptions {
                timeout: request.timeout,
                grace: Duration::from_secs(5),
                output_limit_bytes: request.output_limit_bytes,
                cancel: None,
            },
        )
        .with_context(|| format!("run verifier {}", self.argv[0]))?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&output.stdout_truncated_notice("verifier"));
        log.push_str("\n=== stderr ===\n");
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        write_atomic(&request.log_path, log.as_bytes())?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "verifier timed out");
            return Err(anyhow!(
                "verifier timed out after {}s",
                request.timeout.as_secs()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!("verifier output exceeded the capture limit"));
        }
        if !output.status.success() {
            debug!(exit_code = ?output.status.code(), "verifier exited non-zero");
        }
        let mut result: VerificationResult = serde_json::from_slice(&output.stdout)
            .with_context(|| {
                format!(
                    "parse verification result (exit {:?})",
                    output.status.code()
                )
            })?;
        if result.report.is_none() {
            result.report = Some(request.log_path.display().to_string());
        }
        Ok(result)
    }
}
