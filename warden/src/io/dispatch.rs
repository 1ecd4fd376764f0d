//! One worker dispatch: persist the prompt, run the worker, parse its signal.
//!
//! The prompt and raw output are written verbatim to the dispatch audit
//! directory whatever the outcome. Success is only ever read from a COMPLETE
//! signal; exit status is recorded but never interpreted.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::signal::{CompletePayload, Signal, SignalError, output_tail, parse_signal};
use crate::core::types::{FailureKind, FailureRecord};
use crate::error::GovernanceError;
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::audit::DispatchAudit;
use crate::io::process::CancelFlag;
use crate::io::worker::{Worker, WorkerRequest};

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub task_id: String,
    pub workdir: std::path::PathBuf,
    pub prompt: String,
    pub audit: DispatchAudit,
    pub timeout: Duration,
    pub grace: Duration,
    pub output_limit_bytes: usize,
    pub cancel: Option<CancelFlag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Last portion of raw output, kept when no usable signal was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed(CompletePayload),
    Blocked { reason: String },
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed(_) => "completed",
            DispatchOutcome::Blocked { .. } => "blocked",
            DispatchOutcome::Failed(_) => "failed",
        }
    }
}

impl DispatchFailure {
    pub fn into_record(self, at: DateTime<Utc>, evidence: Vec<String>) -> FailureRecord {
        let mut evidence = evidence;
        if let Some(tail) = self.tail {
            evidence.push(format!("output tail:\n{tail}"));
        }
        FailureRecord {
            at,
            kind: self.kind,
            message: self.message,
            evidence,
        }
    }
}

/// Run one dispatch end to end and persist its audit artifacts.
///
/// Worker-side problems (spawn errors, timeouts, missing or malformed signals)
/// become [`DispatchOutcome::Failed`]; only audit I/O errors are returned as `Err`.
#[instrument(skip_all, fields(task = %request.task_id))]
pub fn dispatch<W: Worker + ?Sized>(worker: &W, request: &DispatchRequest) -> Result<DispatchOutcome> {
    write_atomic(&request.audit.prompt_path, request.prompt.as_bytes())?;

    let run = worker.run(&WorkerRequest {
        task_id: request.task_id.clone(),
        workdir: request.workdir.clone(),
        prompt: request.prompt.clone(),
        timeout: request.timeout,
        grace: request.grace,
        output_limit_bytes: request.output_limit_bytes,
        cancel: request.cancel.clone(),
    });

    let outcome = match run {
        Err(err) => {
            let message = format!("{err:#}");
            write_atomic(
                &request.audit.output_path,
                format!("=== worker error ===\n{message}\n").as_bytes(),
            )?;
            DispatchOutcome::Failed(DispatchFailure {
                kind: FailureKind::WorkerError,
                message: format!("worker could not be run: {message}"),
                tail: None,
            })
        }
        Ok(run) => {
            write_atomic(&request.audit.output_path, run.log().as_bytes())?;
            if run.timed_out || run.cancelled {
                let timeout_secs = request.timeout.as_secs();
                let message = if run.cancelled {
                    format!("dispatch of task '{}' was cancelled", request.task_id)
                } else {
                    GovernanceError::DispatchTimeout {
                        task: request.task_id.clone(),
                        timeout_secs,
                    }
                    .to_string()
                };
                DispatchOutcome::Failed(DispatchFailure {
                    kind: FailureKind::DispatchTimeout,
                    message,
                    tail: Some(output_tail(&run.stdout)),
                })
            } else {
                outcome_from_signal(&request.task_id, &run.stdout)
            }
        }
    };

    match &outcome {
        DispatchOutcome::Failed(failure) => {
            warn!(kind = ?failure.kind, message = %failure.message, "dispatch failed");
        }
        other => info!(outcome = other.label(), "dispatch resolved"),
    }
    write_json_atomic(&request.audit.outcome_path, &outcome)?;
    Ok(outcome)
}

fn outcome_from_signal(task_id: &str, stdout: &str) -> DispatchOutcome {
    match parse_signal(stdout) {
        Ok(Signal::Complete(payload)) => DispatchOutcome::Completed(payload),
        Ok(Signal::Blocked(payload)) => DispatchOutcome::Blocked {
            reason: payload.reason,
        },
        Err(SignalError::NoSignal { tail }) => DispatchOutcome::Failed(DispatchFailure {
            kind: FailureKind::NoSignal,
            message: GovernanceError::NoSignal {
                task: task_id.to_string(),
            }
            .to_string(),
            tail: Some(tail),
        }),
        Err(SignalError::Unparseable { tag, detail }) => DispatchOutcome::Failed(DispatchFailure {
            kind: FailureKind::MalformedSignal,
            message: GovernanceError::MalformedSignal {
                task: task_id.to_string(),
                tag: tag.to_string(),
                detail,
            }
            .to_string(),
            tail: Some(output_tail(stdout)),
        }),
        Err(SignalError::Framing { detail }) => DispatchOutcome::Failed(DispatchFailure {
            kind: FailureKind::MalformedSignal,
            message: format!("task '{task_id}': malformed signal framing: {detail}"),
            tail: Some(output_tail(stdout)),
        }),
    }
}
