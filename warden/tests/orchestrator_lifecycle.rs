//! Loop-level tests for full governance runs.
//!
//! These drive `run_loop` across several cycles with scripted workers and
//! verifiers, then inspect the graph, governance state, and audit trail.

use warden::core::types::{FailureKind, LoopPosition, RiskTier, TaskStatus};
use warden::io::audit::{DispatchAudit, read_decisions};
use warden::io::checkpoint::CheckpointManager;
use warden::io::dispatch::DispatchOutcome;
use warden::io::graph_store::load_graph;
use warden::io::state::load_state;
use warden::orchestrator::{CycleReport, LoopStop, run_loop};
use warden::test_support::{ScriptedRun, ScriptedVerifier, ScriptedWorker, TestRepo, task};

/// Full lifecycle: risky wave checkpointed, a timeout retried, graph completed.
///
/// ```text
/// wave 1: a (high risk, src/a.rs), b (src/b.rs)
/// wave 2: c (depends on a, b)
/// ```
///
/// 1. Cycle 1: checkpoint, dispatch a then b (batch size 1), both approved.
/// 2. Cycle 2: c times out and is recorded as failed.
/// 3. Cycle 3: c is requeued, completes, and is approved.
#[test]
fn full_run_checkpoints_retries_and_completes() {
    let repo = TestRepo::new().expect("repo");
    repo.update_config(|config| config.max_concurrency = 1)
        .expect("config");
    let mut a = task("a", 1, &[]);
    a.risk = RiskTier::High;
    a.files = vec!["src/a.rs".to_string()];
    let mut b = task("b", 1, &[]);
    b.files = vec!["src/b.rs".to_string()];
    repo.write_tasks(vec![a, b, task("c", 2, &["a", "b"])])
        .expect("graph");

    let worker = ScriptedWorker::new();
    worker
        .push(
            "a",
            ScriptedRun::complete("wrote a", &["src/a.rs"]).writing("src/a.rs", "pub fn a() {}\n"),
        )
        .push("b", ScriptedRun::complete("wrote b", &["src/b.rs"]))
        .push("c", ScriptedRun::timed_out())
        .push("c", ScriptedRun::complete("wired c", &[]));
    let verifier = ScriptedVerifier::new();

    let mut reports: Vec<CycleReport> = Vec::new();
    let outcome = run_loop(repo.path(), &worker, &verifier, |report| {
        reports.push(report.clone());
    })
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(outcome.cycles, 3);
    assert!(outcome.recovered.is_empty());
    assert_eq!(worker.calls(), vec!["a", "b", "c", "c"]);
    assert_eq!(verifier.calls(), vec!["a", "b", "c"]);
    assert_eq!(repo.read("src/a.rs").expect("a"), "pub fn a() {}\n");

    let checkpoint_id = reports[0].checkpoint.clone().expect("wave 1 checkpoint");
    assert_eq!(reports[1].checkpoint, None);
    assert_eq!(reports[1].results[0].status, TaskStatus::Failed);
    assert!(reports[1].results[0].detail.contains("timed out"));

    let graph = load_graph(&repo.paths).expect("graph");
    for id in ["a", "b"] {
        assert_eq!(
            graph.get(id).expect("task").checkpoint.as_deref(),
            Some(checkpoint_id.as_str())
        );
    }
    let c = graph.get("c").expect("c");
    assert_eq!(c.status, TaskStatus::Completed);
    assert_eq!(c.summary.as_deref(), Some("wired c"));
    assert!(c.failures.is_empty());
    assert!(c.timestamps.finished_at.is_some());

    let checkpoint = CheckpointManager::new(&repo.paths)
        .get(&checkpoint_id)
        .expect("checkpoint record");
    assert_eq!(checkpoint.task_id, "a");

    let audit = DispatchAudit::new(&repo.paths, &outcome.run_id, 1, "a");
    assert!(audit.prompt_path.is_file());
    assert!(audit.packet_path.is_file());
    assert!(audit.output_path.is_file());
    assert!(audit.verification_path.is_file());
    let timed_out = DispatchAudit::new(&repo.paths, &outcome.run_id, 2, "c");
    let recorded: DispatchOutcome = serde_json::from_str(
        &std::fs::read_to_string(&timed_out.outcome_path).expect("outcome"),
    )
    .expect("parse outcome");
    let DispatchOutcome::Failed(failure) = recorded else {
        panic!("expected failed outcome, got {recorded:?}");
    };
    assert_eq!(failure.kind, FailureKind::DispatchTimeout);

    assert_eq!(read_decisions(&repo.paths).expect("decisions").len(), 3);
    let state = load_state(&repo.paths).expect("state");
    assert_eq!(state.position, LoopPosition::Complete);
    assert_eq!(state.counters.completed, 3);
    assert_eq!(state.session.run_id.as_deref(), Some(outcome.run_id.as_str()));
    assert_eq!(state.session.last_wave, Some(2));
    assert!(repo.paths.state_md_path.is_file());
}

/// Verifies tasks left running by a crashed run are dispatched again.
#[test]
fn interrupted_tasks_are_recovered() {
    let repo = TestRepo::new().expect("repo");
    let mut a = task("a", 1, &[]);
    a.status = TaskStatus::Running;
    repo.write_tasks(vec![a]).expect("graph");
    let worker = ScriptedWorker::new();
    worker.push("a", ScriptedRun::complete("done", &[]));

    let outcome = run_loop(repo.path(), &worker, &ScriptedVerifier::new(), |_| {}).expect("run");

    assert_eq!(outcome.recovered, vec!["a".to_string()]);
    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(worker.calls_for("a"), 1);
}

/// Verifies a worker without a signal fails the task but keeps its output tail.
#[test]
fn missing_signal_keeps_output_tail_as_evidence() {
    let repo = TestRepo::new().expect("repo");
    repo.write_tasks(vec![task("a", 1, &[])]).expect("graph");
    repo.update_config(|config| config.max_cycles = 1)
        .expect("config");
    let worker = ScriptedWorker::new();
    worker.push("a", ScriptedRun::stdout("refactored everything, trust me\n"));

    let outcome = run_loop(repo.path(), &worker, &ScriptedVerifier::new(), |_| {}).expect("run");

    assert_eq!(outcome.stop, LoopStop::MaxCycles { max_cycles: 1 });
    let graph = load_graph(&repo.paths).expect("graph");
    let failure = graph.get("a").expect("a").last_failure().expect("failure").clone();
    assert_eq!(failure.kind, FailureKind::NoSignal);
    assert!(
        failure
            .evidence
            .iter()
            .any(|item| item.contains("trust me"))
    );
}
