//! CLI tests for `warden` exit codes.
//!
//! Spawns the warden binary and verifies exit codes for complete, ready,
//! stalled, invalid, and rejected states.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use warden::core::judge::VerificationResult;
use warden::core::types::{TaskStatus, VerificationFlag};
use warden::exit_codes;
use warden::graph::TaskGraph;
use warden::io::graph_store::write_graph;
use warden::io::init::{InitOptions, WardenPaths, init_warden};
use warden::test_support::task;

fn warden(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run warden")
}

fn initialized() -> (tempfile::TempDir, WardenPaths) {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_warden(temp.path(), &InitOptions { force: false }).expect("init");
    (temp, paths)
}

#[test]
fn wave_on_empty_graph_exits_complete() {
    let (temp, _paths) = initialized();
    let output = warden(temp.path(), &["wave"]);
    assert_eq!(output.status.code(), Some(exit_codes::COMPLETE));
}

#[test]
fn wave_prints_ready_tasks() {
    let (temp, paths) = initialized();
    let graph = TaskGraph::from_tasks(vec![
        task("a", 1, &[]),
        task("b", 1, &[]),
        task("c", 2, &["a"]),
    ])
    .expect("graph");
    write_graph(&paths, &graph).expect("write graph");

    let output = warden(temp.path(), &["wave"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "wave 1\na\nb\n");
}

#[test]
fn wave_behind_blocked_task_exits_stalled() {
    let (temp, paths) = initialized();
    let mut a = task("a", 1, &[]);
    a.status = TaskStatus::Blocked;
    a.blocked_reason = Some("needs credentials".to_string());
    let graph = TaskGraph::from_tasks(vec![a, task("b", 2, &["a"])]).expect("graph");
    write_graph(&paths, &graph).expect("write graph");

    let output = warden(temp.path(), &["wave"]);
    assert_eq!(output.status.code(), Some(exit_codes::STALLED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("b (pending) waits on a (blocked)"), "{stderr}");
}

/// Verifies validate lists every violation and exits invalid.
#[test]
fn validate_invalid_graph_exits_invalid() {
    let (temp, paths) = initialized();
    fs::write(
        &paths.graph_path,
        r#"{"version": 1, "tasks": [
            {"id": "a", "phase": "p1", "description": "a", "risk": "low", "test_mode": "standard",
             "depends_on": ["ghost"], "files": [], "wave": 1},
            {"id": "a", "phase": "p1", "description": "again", "risk": "low", "test_mode": "standard",
             "depends_on": [], "files": [], "wave": 1}
        ]}"#,
    )
    .expect("write graph");

    let output = warden(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ghost"), "{stderr}");
    assert!(stderr.contains("duplicate task id 'a'"), "{stderr}");
}

#[test]
fn validate_outside_project_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = warden(temp.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn judge_exit_code_follows_verdict() {
    let temp = tempfile::tempdir().expect("tempdir");
    let passing = temp.path().join("passing.json");
    fs::write(
        &passing,
        serde_json::to_string(&VerificationResult::passing()).expect("serialize"),
    )
    .expect("write");
    let output = warden(temp.path(), &["judge", "passing.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"approved\""));

    let mut failing = VerificationResult::passing();
    failing.flags.set(VerificationFlag::IntegrationTests, false);
    fs::write(
        temp.path().join("failing.json"),
        serde_json::to_string(&failing).expect("serialize"),
    )
    .expect("write");
    let output = warden(temp.path(), &["judge", "failing.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(String::from_utf8_lossy(&output.stdout).contains("\"rejected\""));
}

#[test]
fn second_init_requires_force() {
    let (temp, _paths) = initialized();
    assert_eq!(
        warden(temp.path(), &["init"]).status.code(),
        Some(exit_codes::INVALID)
    );
    assert_eq!(
        warden(temp.path(), &["init", "--force"]).status.code(),
        Some(exit_codes::OK)
    );
}
