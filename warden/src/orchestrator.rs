//! Governance loop for `warden run`.
//!
//! Each cycle selects one wave, checkpoints it if any task is risky, dispatches
//! it in fixed-size batches, judges every completion, and persists the graph
//! and governance state after every transition. The loop stops when the graph
//! is complete, nothing can make progress, or the cycle cap is reached.

use std::collections::BTreeSet;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::escalation::{GateDecision, dispatch_gate};
use crate::core::judge::{MergeDecision, Verdict, judge, unique_in_order};
use crate::core::scheduler::{StallReport, Wave, WaveSelection, next_wave};
use crate::core::transitions::Completion;
use crate::core::types::{FailureKind, FailureRecord, LoopPosition, TaskStatus};
use crate::error::GovernanceError;
use crate::graph::{Task, TaskGraph};
use crate::io::atomic::write_json_atomic;
use crate::io::audit::{DecisionEntry, DispatchAudit, append_decision, display_path, write_escalation};
use crate::io::checkpoint::CheckpointManager;
use crate::io::config::{WardenConfig, load_config};
use crate::io::context::build_packet;
use crate::io::dispatch::{DispatchOutcome, DispatchRequest, dispatch};
use crate::io::graph_store::{load_graph, write_graph};
use crate::io::init::WardenPaths;
use crate::io::prompt::render_worker_prompt;
use crate::io::state::{DecisionSummary, GovernanceState, load_state, write_state};
use crate::io::verifier::{Verifier, VerifyRequest};
use crate::io::worker::Worker;

/// Prefix of the blocked reason given to tasks of an automation-disabled phase.
pub const DISABLED_PHASE_REASON: &str = "automation disabled for phase";

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every task is completed, superseded, or deferred.
    Complete,
    /// No task can become ready.
    Stalled(StallReport),
    MaxCycles { max_cycles: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub cycles: u32,
    /// Tasks found `running` from an interrupted run and put back to pending.
    pub recovered: Vec<String>,
    pub stop: LoopStop,
}

/// What happened to one task in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u32,
    pub wave: u32,
    pub checkpoint: Option<String>,
    pub results: Vec<TaskResult>,
    /// Tasks refused by the dispatch gate this cycle.
    pub escalated: Vec<String>,
}

/// Run governance cycles until the graph completes, stalls, or hits the cycle cap.
///
/// Task-local failures are recorded on the graph and never stop the loop.
/// Checkpoint preconditions, store corruption, and rollback failures do.
pub fn run_loop<W, V, F>(root: &Path, worker: &W, verifier: &V, mut on_cycle: F) -> Result<LoopOutcome>
where
    W: Worker + ?Sized,
    V: Verifier + ?Sized,
    F: FnMut(&CycleReport),
{
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let config = load_config(&paths.config_path)?;
    let mut graph = load_graph(&paths)?;
    let mut state = load_state(&paths)?;

    let started = Utc::now();
    let run_id = format!("run-{}", started.format("%Y%m%dT%H%M%S%.3fZ"));
    let recovered = graph.recover_interrupted(started);
    if !recovered.is_empty() {
        warn!(tasks = ?recovered, "recovered tasks left running by an interrupted run");
    }
    state.session.run_id = Some(run_id.clone());
    state.session.cycle = 0;
    info!(%run_id, tasks = graph.len(), "governance run started");

    let mut run = Run {
        paths: &paths,
        config: &config,
        run_id: &run_id,
        graph: &mut graph,
        state: &mut state,
    };

    let mut cycles = 0u32;
    let stop = loop {
        let now = Utc::now();
        run.requeue_failed(now)?;
        run.state.position = LoopPosition::Planning;
        run.persist(now)?;

        match next_wave(&*run.graph) {
            WaveSelection::Complete => {
                run.state.position = LoopPosition::Complete;
                run.persist(Utc::now())?;
                info!(cycles, "graph complete");
                break LoopStop::Complete;
            }
            WaveSelection::Stalled(report) => {
                warn!(stuck = ?report.stuck_ids(), "{}", GovernanceError::Deadlock {
                    tasks: report.stuck_ids(),
                });
                break LoopStop::Stalled(report);
            }
            WaveSelection::Ready(wave) => {
                if cycles >= config.max_cycles {
                    warn!(max_cycles = config.max_cycles, "cycle cap reached");
                    break LoopStop::MaxCycles {
                        max_cycles: config.max_cycles,
                    };
                }
                cycles += 1;
                let report = run.cycle(cycles, &wave, worker, verifier)?;
                on_cycle(&report);
            }
        }
    };

    Ok(LoopOutcome {
        run_id,
        cycles,
        recovered,
        stop,
    })
}

/// Mutable view of one run: stores are loaded once and written back after
/// every batch of related transitions.
struct Run<'a> {
    paths: &'a WardenPaths,
    config: &'a WardenConfig,
    run_id: &'a str,
    graph: &'a mut TaskGraph,
    state: &'a mut GovernanceState,
}

impl Run<'_> {
    #[instrument(skip_all, fields(cycle = cycle, wave = wave.number, tasks = wave.task_ids.len()))]
    fn cycle<W, V>(&mut self, cycle: u32, wave: &Wave, worker: &W, verifier: &V) -> Result<CycleReport>
    where
        W: Worker + ?Sized,
        V: Verifier + ?Sized,
    {
        self.state.session.cycle = cycle;
        self.state.session.last_wave = Some(wave.number);
        let mut report = CycleReport {
            cycle,
            wave: wave.number,
            checkpoint: None,
            results: Vec::new(),
            escalated: Vec::new(),
        };

        let dispatchable = self.gate(wave, &mut report)?;
        if dispatchable.is_empty() {
            self.state.position = LoopPosition::Unifying;
            self.persist(Utc::now())?;
            return Ok(report);
        }

        report.checkpoint = self.checkpoint_if_risky(wave.number, &dispatchable)?;

        let now = Utc::now();
        for id in &dispatchable {
            self.graph.mark_running(id, now)?;
        }
        self.state.position = LoopPosition::Executing;
        self.persist(now)?;

        let mut outcomes = Vec::with_capacity(dispatchable.len());
        for batch in dispatchable.chunks(self.config.max_concurrency) {
            debug!(batch = ?batch, "dispatching batch");
            outcomes.extend(self.dispatch_batch(cycle, batch, worker)?);
        }

        self.state.position = LoopPosition::Verifying;
        self.persist(Utc::now())?;
        for (task_id, audit, outcome) in outcomes {
            let result = self.resolve(&task_id, &audit, outcome, verifier)?;
            report.results.push(result);
        }

        self.state.position = LoopPosition::Unifying;
        self.persist(Utc::now())?;
        info!(
            cycle,
            wave = wave.number,
            completed = report
                .results
                .iter()
                .filter(|r| r.status == TaskStatus::Completed)
                .count(),
            "cycle finished"
        );
        Ok(report)
    }

    /// Apply the escalation gate and the gap-closure switch to a selected wave.
    fn gate(&mut self, wave: &Wave, report: &mut CycleReport) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut dispatchable = Vec::new();
        for id in &wave.task_ids {
            let task = self.task(id)?;
            if self.state.phase_disabled(&task.phase) {
                let reason = format!(
                    "{DISABLED_PHASE_REASON} '{}' (gap-closure cap reached)",
                    task.phase
                );
                warn!(task = %id, %reason, "not dispatched");
                self.graph.mark_blocked(id, reason.clone(), now)?;
                report.results.push(TaskResult {
                    task_id: id.clone(),
                    status: TaskStatus::Blocked,
                    detail: reason,
                });
                continue;
            }
            match dispatch_gate(task, now) {
                GateDecision::Dispatch => dispatchable.push(id.clone()),
                GateDecision::Escalate(record) => {
                    let path = write_escalation(self.paths, &record)?;
                    let reason = format!(
                        "escalated: {} (record: {})",
                        record.reason,
                        display_path(self.paths, &path)
                    );
                    warn!(task = %id, record = %path.display(), "dispatch refused, escalating");
                    self.graph.mark_blocked(id, reason.clone(), now)?;
                    self.state.record_escalation(format!("task {id}"));
                    report.escalated.push(id.clone());
                    report.results.push(TaskResult {
                        task_id: id.clone(),
                        status: TaskStatus::Blocked,
                        detail: reason,
                    });
                }
            }
        }
        Ok(dispatchable)
    }

    fn checkpoint_if_risky(&mut self, wave: u32, ids: &[String]) -> Result<Option<String>> {
        let risky: Vec<&Task> = ids
            .iter()
            .filter_map(|id| self.graph.get(id))
            .filter(|task| task.risk.requires_checkpoint())
            .collect();
        let Some(owner) = risky.first() else {
            return Ok(None);
        };
        let owner_id = owner.id.clone();
        let mut files = BTreeSet::new();
        for id in ids {
            files.extend(self.task(id)?.files.iter().cloned());
        }
        let files: Vec<String> = files.into_iter().collect();
        let description = format!("before wave {wave} ({})", ids.join(", "));

        let manager = CheckpointManager::new(self.paths);
        let checkpoint = manager
            .create(&owner_id, &description, &files, Utc::now())
            .with_context(|| format!("checkpoint before wave {wave}"))?;
        for id in ids {
            self.graph.set_checkpoint(id, &checkpoint.id)?;
        }
        let pruned = manager.prune(self.config.checkpoint_retention)?;
        if !pruned.is_empty() {
            debug!(pruned = ?pruned, "old checkpoint records pruned");
        }
        Ok(Some(checkpoint.id))
    }

    /// Dispatch one batch concurrently; returns once every task has resolved.
    fn dispatch_batch<W: Worker + ?Sized>(
        &self,
        cycle: u32,
        batch: &[String],
        worker: &W,
    ) -> Result<Vec<(String, DispatchAudit, DispatchOutcome)>> {
        let graph: &TaskGraph = &*self.graph;
        let state: &GovernanceState = &*self.state;
        thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|id| {
                    scope.spawn(move || -> Result<(String, DispatchAudit, DispatchOutcome)> {
                        let audit = DispatchAudit::new(self.paths, self.run_id, cycle, id);
                        let packet = build_packet(self.paths, self.config, graph, state, id)?;
                        write_json_atomic(&audit.packet_path, &packet)?;
                        let prompt = render_worker_prompt(&packet)?;
                        let request = DispatchRequest {
                            task_id: id.clone(),
                            workdir: self.paths.root.clone(),
                            prompt,
                            audit: audit.clone(),
                            timeout: self.config.worker_timeout(),
                            grace: self.config.termination_grace(),
                            output_limit_bytes: self.config.worker_output_limit_bytes,
                            cancel: None,
                        };
                        let outcome = dispatch(worker, &request)?;
                        Ok((id.clone(), audit, outcome))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| anyhow!("dispatch thread panicked"))?
                })
                .collect()
        })
    }

    /// Turn one dispatch outcome into a graph transition, verifying completions.
    fn resolve<V: Verifier + ?Sized>(
        &mut self,
        task_id: &str,
        audit: &DispatchAudit,
        outcome: DispatchOutcome,
        verifier: &V,
    ) -> Result<TaskResult> {
        let output_log = display_path(self.paths, &audit.output_path);
        let result = match outcome {
            DispatchOutcome::Blocked { reason } => {
                self.graph.mark_blocked(task_id, reason.clone(), Utc::now())?;
                TaskResult {
                    task_id: task_id.to_string(),
                    status: TaskStatus::Blocked,
                    detail: reason,
                }
            }
            DispatchOutcome::Failed(failure) => {
                let message = failure.message.clone();
                let record = failure.into_record(Utc::now(), vec![output_log]);
                self.graph.mark_failed(task_id, record, None, Utc::now())?;
                TaskResult {
                    task_id: task_id.to_string(),
                    status: TaskStatus::Failed,
                    detail: message,
                }
            }
            DispatchOutcome::Completed(payload) => {
                let task = self.task(task_id)?.clone();
                let request = VerifyRequest {
                    workdir: self.paths.root.clone(),
                    task,
                    completion: payload.clone(),
                    timeout: self.config.verifier_timeout(),
                    output_limit_bytes: self.config.worker_output_limit_bytes,
                    log_path: audit.verifier_log_path.clone(),
                };
                match verifier.verify(&request) {
                    Err(err) => {
                        let message = format!("verification incomplete: {err:#}");
                        warn!(task = task_id, %message, "verifier did not produce a result");
                        let record = FailureRecord {
                            at: Utc::now(),
                            kind: FailureKind::VerificationIncomplete,
                            message: message.clone(),
                            evidence: vec![
                                display_path(self.paths, &audit.verifier_log_path),
                                output_log,
                            ],
                        };
                        self.graph.mark_failed(task_id, record, None, Utc::now())?;
                        TaskResult {
                            task_id: task_id.to_string(),
                            status: TaskStatus::Failed,
                            detail: message,
                        }
                    }
                    Ok(verification) => {
                        write_json_atomic(&audit.verification_path, &verification)?;
                        let decision = judge(&verification);
                        self.record_decision(task_id, &decision, Utc::now())?;
                        self.apply_decision(task_id, payload.summary, payload.files_modified, decision)?
                    }
                }
            }
        };
        self.persist(Utc::now())?;
        Ok(result)
    }

    fn apply_decision(
        &mut self,
        task_id: &str,
        summary: String,
        files_modified: Vec<String>,
        decision: MergeDecision,
    ) -> Result<TaskResult> {
        let now = Utc::now();
        let detail = decision.describe();
        if decision.is_approved() {
            self.graph.mark_completed(
                task_id,
                Completion {
                    summary,
                    files_modified,
                    decision: Some(decision),
                },
                now,
            )?;
            info!(task = task_id, "approved");
            return Ok(TaskResult {
                task_id: task_id.to_string(),
                status: TaskStatus::Completed,
                detail,
            });
        }

        let kind = match decision.verdict {
            Verdict::NeedsRevision => FailureKind::VerificationIncomplete,
            Verdict::Approved | Verdict::Rejected => FailureKind::VerificationRejected,
        };
        let mut message: Vec<String> = decision
            .flags
            .failing()
            .into_iter()
            .map(|flag| {
                GovernanceError::VerificationFlagFalse {
                    task: task_id.to_string(),
                    flag,
                }
                .to_string()
            })
            .collect();
        message.push(detail.clone());
        let evidence = unique_in_order(
            decision
                .reasons
                .iter()
                .flat_map(|reason| reason.evidence.iter().cloned()),
        );
        let record = FailureRecord {
            at: now,
            kind,
            message: message.join("; "),
            evidence,
        };
        warn!(task = task_id, verdict = decision.verdict.as_str(), "not approved");
        self.graph.mark_failed(task_id, record, Some(decision), now)?;
        Ok(TaskResult {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            detail,
        })
    }

    fn record_decision(&mut self, task_id: &str, decision: &MergeDecision, at: DateTime<Utc>) -> Result<()> {
        append_decision(
            self.paths,
            &DecisionEntry {
                at,
                task_id: task_id.to_string(),
                run_id: Some(self.run_id.to_string()),
                decision: decision.clone(),
            },
        )?;
        self.state
            .record_decision(DecisionSummary::new(task_id, decision, at));
        Ok(())
    }

    /// Put failed tasks back in the queue; the dispatch gate decides whether
    /// they actually run again.
    fn requeue_failed(&mut self, at: DateTime<Utc>) -> Result<()> {
        let failed: Vec<String> = self
            .graph
            .tasks()
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .map(|task| task.id.clone())
            .collect();
        for id in failed {
            debug!(task = %id, "requeueing failed task");
            self.graph.requeue(&id, at)?;
        }
        Ok(())
    }

    fn task(&self, id: &str) -> Result<&Task> {
        self.graph.get(id).ok_or_else(|| {
            GovernanceError::UnknownTask {
                task: id.to_string(),
            }
            .into()
        })
    }

    fn persist(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.state.refresh_from_graph(&*self.graph);
        self.state.updated_at = Some(at);
        write_graph(self.paths, &*self.graph)?;
        write_state(self.paths, &*self.state)
    }
}

/// Append remediation tasks for a phase, consuming one gap-closure round.
///
/// Returns the round number. Past the cap the phase is disabled, the refusal
/// is recorded as an escalation, and an `EscalationLimitReached` error is returned.
pub fn begin_gap_closure(root: &Path, phase: &str, tasks: Vec<Task>) -> Result<u32> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let mut graph = load_graph(&paths)?;
    let mut state = load_state(&paths)?;

    for task in tasks {
        if task.phase != phase {
            return Err(GovernanceError::InvalidTask {
                task: task.id,
                reason: format!("remediation task belongs to phase '{phase}'"),
            }
            .into());
        }
        graph.add_task(task)?;
    }

    let closure = state.gap_closure.entry(phase.to_string()).or_default();
    let round = match closure.begin_iteration(phase) {
        Ok(round) => round,
        Err(err) => {
            state.record_escalation(format!("phase {phase}"));
            state.updated_at = Some(Utc::now());
            write_state(&paths, &state)?;
            warn!(phase, "gap-closure cap reached, automation disabled");
            return Err(err.into());
        }
    };

    state.refresh_from_graph(&graph);
    state.updated_at = Some(Utc::now());
    write_graph(&paths, &graph)?;
    write_state(&paths, &state)?;
    info!(phase, round, "gap-closure round started");
    Ok(round)
}

/// Human reset of a phase's gap-closure cap. Requeues tasks blocked by it.
pub fn reset_gap_closure(root: &Path, phase: &str) -> Result<Vec<String>> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let mut graph = load_graph(&paths)?;
    let mut state = load_state(&paths)?;
    let now = Utc::now();

    if let Some(closure) = state.gap_closure.get_mut(phase) {
        closure.reset();
    }
    let unit = format!("phase {phase}");
    state.escalations.retain(|escalated| *escalated != unit);

    let held: Vec<String> = graph
        .tasks_in_phase(phase)
        .filter(|task| {
            task.status == TaskStatus::Blocked
                && task
                    .blocked_reason
                    .as_deref()
                    .is_some_and(|reason| reason.starts_with(DISABLED_PHASE_REASON))
        })
        .map(|task| task.id.clone())
        .collect();
    for id in &held {
        graph.requeue(id, now)?;
    }

    state.refresh_from_graph(&graph);
    state.updated_at = Some(now);
    write_graph(&paths, &graph)?;
    write_state(&paths, &state)?;
    info!(phase, requeued = held.len(), "gap closure reset");
    Ok(held)
}

/// Human decision to give an escalated or blocked task a fresh start.
pub fn retry_task(root: &Path, task_id: &str) -> Result<()> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let mut graph = load_graph(&paths)?;
    let mut state = load_state(&paths)?;
    let now = Utc::now();

    graph.retry(task_id, now)?;
    let unit = format!("task {task_id}");
    state.escalations.retain(|escalated| *escalated != unit);
    state.refresh_from_graph(&graph);
    state.updated_at = Some(now);
    write_graph(&paths, &graph)?;
    write_state(&paths, &state)?;
    info!(task = task_id, "task requeued for retry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::judge::{Gap, VerificationResult};
    use crate::core::types::{Severity, VerificationFlag};
    use crate::io::audit::read_decisions;
    use crate::test_support::{ScriptedRun, ScriptedVerifier, ScriptedWorker, TestRepo, task};

    fn rejected(artifact: &str) -> VerificationResult {
        let mut result = VerificationResult::passing();
        result.flags.set(VerificationFlag::ArtifactsExist, false);
        result.gaps.push(Gap {
            flag: VerificationFlag::ArtifactsExist,
            artifact: artifact.to_string(),
            description: "stub body".to_string(),
            severity: Severity::Blocking,
        });
        result
    }

    /// Verifies a blocked task halts only its dependents while siblings finish.
    #[test]
    fn blocked_task_stalls_only_its_chain() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tasks(vec![
            task("a", 1, &[]),
            task("b", 1, &[]),
            task("c", 2, &["a"]),
            task("d", 2, &["b"]),
        ])
        .expect("graph");
        let worker = ScriptedWorker::new();
        worker
            .push("a", ScriptedRun::blocked("needs credentials"))
            .push("b", ScriptedRun::complete("b done", &[]))
            .push("d", ScriptedRun::complete("d done", &[]));
        let verifier = ScriptedVerifier::new();

        let mut reports = Vec::new();
        let outcome = run_loop(repo.path(), &worker, &verifier, |report| {
            reports.push(report.clone())
        })
        .expect("run");

        let LoopStop::Stalled(report) = outcome.stop else {
            panic!("expected stall, got {:?}", outcome.stop);
        };
        assert_eq!(report.stuck_ids(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(outcome.cycles, 2);
        assert_eq!(worker.calls_for("d"), 1);
        assert_eq!(worker.calls_for("c"), 0);

        let graph = load_graph(&repo.paths).expect("graph");
        assert_eq!(graph.get("d").expect("d").status, TaskStatus::Completed);
        let state = load_state(&repo.paths).expect("state");
        assert_eq!(state.blockers.len(), 1);
        assert_eq!(state.blockers[0].reason, "needs credentials");
    }

    /// Verifies a rejection records a decision and a failure citing the artifact.
    #[test]
    fn rejection_is_recorded_then_retried() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tasks(vec![task("a", 1, &[])]).expect("graph");
        let worker = ScriptedWorker::new();
        worker
            .push("a", ScriptedRun::complete("first try", &[]))
            .push("a", ScriptedRun::complete("second try", &[]));
        let verifier = ScriptedVerifier::new();
        verifier.push("a", rejected("src/a.rs"));

        let outcome = run_loop(repo.path(), &worker, &verifier, |_| {}).expect("run");
        assert_eq!(outcome.stop, LoopStop::Complete);
        assert_eq!(outcome.cycles, 2);

        let decisions = read_decisions(&repo.paths).expect("decisions");
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].decision.verdict, Verdict::Rejected);
        assert_eq!(decisions[0].decision.reasons[0].evidence, vec!["src/a.rs"]);
        assert!(decisions[1].decision.is_approved());

        let graph = load_graph(&repo.paths).expect("graph");
        let a = graph.get("a").expect("a");
        assert_eq!(a.summary.as_deref(), Some("second try"));
        assert!(a.failures.is_empty());

        let state = load_state(&repo.paths).expect("state");
        assert_eq!(state.position, LoopPosition::Complete);
        assert_eq!(state.recent_decisions.len(), 2);
    }

    /// Verifies an artifact cited under several flags appears once in the failure.
    #[test]
    fn failure_evidence_lists_each_artifact_once() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tasks(vec![task("a", 1, &[])]).expect("graph");
        repo.update_config(|config| config.max_cycles = 1)
            .expect("config");
        let worker = ScriptedWorker::new();
        worker.push("a", ScriptedRun::complete("done", &[]));
        let mut result = rejected("src/a.rs");
        result.flags.set(VerificationFlag::GoalWiring, false);
        for artifact in ["src/b.rs", "src/a.rs"] {
            result.gaps.push(Gap {
                flag: VerificationFlag::GoalWiring,
                artifact: artifact.to_string(),
                description: "export never called".to_string(),
                severity: Severity::Blocking,
            });
        }
        let verifier = ScriptedVerifier::new();
        verifier.push("a", result);

        run_loop(repo.path(), &worker, &verifier, |_| {}).expect("run");

        let graph = load_graph(&repo.paths).expect("graph");
        let failure = graph.get("a").expect("a").last_failure().expect("failure").clone();
        assert_eq!(failure.evidence, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn verifier_error_is_incomplete_failure() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tasks(vec![task("a", 1, &[])]).expect("graph");
        repo.update_config(|config| config.max_cycles = 1)
            .expect("config");
        let worker = ScriptedWorker::new();
        worker.push("a", ScriptedRun::complete("done", &[]));
        let verifier = ScriptedVerifier::new();
        verifier.push_error("a", "verifier crashed");

        let outcome = run_loop(repo.path(), &worker, &verifier, |_| {}).expect("run");
        assert_eq!(outcome.stop, LoopStop::MaxCycles { max_cycles: 1 });
        let graph = load_graph(&repo.paths).expect("graph");
        let a = graph.get("a").expect("a");
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.failures[0].kind, FailureKind::VerificationIncomplete);
        assert!(a.failures[0].message.contains("verifier crashed"));
    }

    /// Verifies the gap-closure cap blocks the phase until a human reset.
    #[test]
    fn gap_closure_cap_disables_phase_until_reset() {
        let repo = TestRepo::new().expect("repo");
        repo.write_tasks(vec![task("a", 1, &[])]).expect("graph");

        for round in 1..=3 {
            let fix = task(&format!("fix-{round}"), 1, &[]);
            assert_eq!(begin_gap_closure(repo.path(), "p1", vec![fix]).expect("round"), round);
        }
        let err = begin_gap_closure(repo.path(), "p1", vec![task("fix-4", 1, &[])])
            .expect_err("cap");
        assert!(matches!(
            err.downcast_ref::<GovernanceError>(),
            Some(GovernanceError::EscalationLimitReached { .. })
        ));
        let graph = load_graph(&repo.paths).expect("graph");
        assert!(!graph.contains("fix-4"));

        let worker = ScriptedWorker::new();
        let outcome = run_loop(repo.path(), &worker, &ScriptedVerifier::new(), |_| {})
            .expect("run");
        assert!(matches!(outcome.stop, LoopStop::Stalled(_)));
        assert!(worker.calls().is_empty());

        let requeued = reset_gap_closure(repo.path(), "p1").expect("reset");
        assert_eq!(requeued.len(), 4);
        let state = load_state(&repo.paths).expect("state");
        assert!(!state.phase_disabled("p1"));
        assert!(state.escalations.is_empty());
    }

    #[test]
    fn retry_clears_escalation() {
        let repo = TestRepo::new().expect("repo");
        let mut a = task("a", 1, &[]);
        a.status = TaskStatus::Blocked;
        a.blocked_reason = Some("escalated".to_string());
        repo.write_tasks(vec![a]).expect("graph");
        let mut state = load_state(&repo.paths).expect("state");
        state.record_escalation("task a");
        write_state(&repo.paths, &state).expect("write state");

        retry_task(repo.path(), "a").expect("retry");
        let graph = load_graph(&repo.paths).expect("graph");
        assert_eq!(graph.get("a").expect("a").status, TaskStatus::Pending);
        assert!(load_state(&repo.paths).expect("state").escalations.is_empty());
    }
}
