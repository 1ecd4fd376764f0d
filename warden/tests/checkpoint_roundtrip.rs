//! Checkpoint create/rollback against a real git repository.
//!
//! Requires `git` on PATH.

use std::fs;

use warden::error::GovernanceError;
use warden::io::audit::read_rollbacks;
use warden::io::checkpoint::CheckpointManager;
use warden::io::init::{InitOptions, init_warden};
use warden::io::scars::{ScarInput, active_rules, consolidate, load_scars, record_scar};
use warden::test_support::{TestRepo, fixed_time};

fn scar_input(checkpoint_id: &str, rule: &str) -> ScarInput {
    ScarInput {
        checkpoint_id: checkpoint_id.to_string(),
        failure: "parser rewrite broke the lexer".to_string(),
        root_cause: "worker edited a sibling task's file".to_string(),
        rule: rule.to_string(),
        confirmed_by: "reviewer".to_string(),
    }
}

/// Verifies rollback restores the checkpoint and keeps the discarded work in quarantine.
#[test]
fn rollback_restores_files_and_quarantines_changes() {
    let repo = TestRepo::new().expect("repo");
    repo.write("src/lib.rs", "pub fn v1() {}\n").expect("write");
    repo.commit_all("add lib").expect("commit");
    repo.write("src/lib.rs", "pub fn v2() {}\n").expect("write");
    repo.write("notes.txt", "not part of the checkpoint\n").expect("write");

    let manager = CheckpointManager::new(&repo.paths);
    let checkpoint = manager
        .create(
            "t1",
            "before parser rewrite",
            &["src/lib.rs".to_string(), "src/missing.rs".to_string()],
            fixed_time(),
        )
        .expect("create");
    assert_eq!(checkpoint.files, vec!["src/lib.rs".to_string()]);
    let head = repo.git(&["rev-parse", "HEAD"]).expect("head");
    assert_eq!(head.trim(), checkpoint.revision);
    let committed = repo
        .git(&["show", "--name-only", "--format=", "HEAD"])
        .expect("show");
    assert_eq!(committed.trim(), "src/lib.rs");

    repo.write("src/lib.rs", "pub fn broken( {}\n").expect("write");
    repo.write("src/new.rs", "pub fn stray() {}\n").expect("write");

    let report = manager.rollback(&checkpoint.id, fixed_time()).expect("rollback");

    assert_eq!(repo.read("src/lib.rs").expect("lib"), "pub fn v2() {}\n");
    assert!(!repo.path().join("src/new.rs").exists());
    let patch = fs::read_to_string(&report.quarantine).expect("quarantine");
    assert!(patch.contains("pub fn broken( {}"));
    assert!(patch.contains("src/new.rs"));
    assert!(report.quarantined_bytes > 0);
    // Coordination state lives under .warden/ and survives the reset.
    assert!(repo.paths.graph_path.is_file());

    let rollbacks = read_rollbacks(&repo.paths).expect("rollbacks");
    assert_eq!(rollbacks.len(), 1);
    assert!(rollbacks[0].succeeded);
    assert_eq!(rollbacks[0].checkpoint_id, checkpoint.id);
}

/// Verifies uncommitted edits to tracked `.warden/` files survive a rollback
/// and are also recorded in the quarantine patch.
#[test]
fn rollback_keeps_uncommitted_project_edits() {
    let repo = TestRepo::new().expect("repo");
    let manager = CheckpointManager::new(&repo.paths);
    let checkpoint = manager
        .create("t1", "before edit", &[], fixed_time())
        .expect("create");

    let mission = "# Mission\n\nHand-edited, not committed yet.\n";
    fs::write(&repo.paths.mission_path, mission).expect("write mission");
    fs::write(repo.paths.project_dir.join("notes.md"), "scratch notes\n").expect("write notes");
    repo.write("src/stray.rs", "pub fn stray() {}\n").expect("write");

    let report = manager.rollback(&checkpoint.id, fixed_time()).expect("rollback");

    assert_eq!(
        fs::read_to_string(&repo.paths.mission_path).expect("mission"),
        mission
    );
    assert_eq!(
        fs::read_to_string(repo.paths.project_dir.join("notes.md")).expect("notes"),
        "scratch notes\n"
    );
    assert!(!repo.path().join("src/stray.rs").exists());
    let patch = fs::read_to_string(&report.quarantine).expect("quarantine");
    assert!(patch.contains("Hand-edited, not committed yet."));
    assert!(patch.contains("src/stray.rs"));
}

#[test]
fn empty_checkpoint_still_creates_a_commit() {
    let repo = TestRepo::new().expect("repo");
    let before = repo.git(&["rev-parse", "HEAD"]).expect("head");

    let checkpoint = CheckpointManager::new(&repo.paths)
        .create("t1", "nothing staged", &[], fixed_time())
        .expect("create");

    assert_ne!(before.trim(), checkpoint.revision);
    let message = repo.git(&["log", "-1", "--format=%s"]).expect("log");
    assert!(message.contains(&checkpoint.id));
}

#[test]
fn checkpoint_outside_git_fails_precondition() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_warden(temp.path(), &InitOptions { force: false }).expect("init");
    let manager = CheckpointManager::new(&paths);

    // Skip when the temp dir happens to live inside another work tree.
    if manager.preflight().is_ok() {
        return;
    }
    let err = manager
        .create("t1", "unprotected", &[], fixed_time())
        .expect_err("outside git");
    assert!(matches!(
        err.downcast_ref::<GovernanceError>(),
        Some(GovernanceError::Precondition(_))
    ));
}

/// Verifies pruning keeps the newest records and leaves git history alone.
#[test]
fn prune_drops_oldest_records_only() {
    let repo = TestRepo::new().expect("repo");
    let manager = CheckpointManager::new(&repo.paths);
    let mut ids = Vec::new();
    for n in 1..=3 {
        let checkpoint = manager
            .create(&format!("t{n}"), "step", &[], fixed_time())
            .expect("create");
        ids.push((checkpoint.id, checkpoint.revision));
    }

    let removed = manager.prune(1).expect("prune");
    assert_eq!(removed, vec![ids[0].0.clone(), ids[1].0.clone()]);
    let remaining: Vec<String> = manager
        .list()
        .expect("list")
        .into_iter()
        .map(|checkpoint| checkpoint.id)
        .collect();
    assert_eq!(remaining, vec![ids[2].0.clone()]);
    let kind = repo.git(&["cat-file", "-t", &ids[0].1]).expect("cat-file");
    assert_eq!(kind.trim(), "commit");
}

/// Verifies scars need a real rollback and duplicates fold into the oldest rule.
#[test]
fn scars_follow_rollbacks_and_consolidate() {
    let repo = TestRepo::new().expect("repo");
    let manager = CheckpointManager::new(&repo.paths);
    let checkpoint = manager
        .create("t1", "before change", &[], fixed_time())
        .expect("create");

    let err = record_scar(&repo.paths, &scar_input(&checkpoint.id, "Stay in scope."), fixed_time())
        .expect_err("no rollback yet");
    assert!(matches!(
        err.downcast_ref::<GovernanceError>(),
        Some(GovernanceError::Precondition(_))
    ));

    repo.write("README.md", "changed\n").expect("write");
    manager.rollback(&checkpoint.id, fixed_time()).expect("rollback");

    let mut unconfirmed = scar_input(&checkpoint.id, "Stay in scope.");
    unconfirmed.confirmed_by = "  ".to_string();
    assert!(record_scar(&repo.paths, &unconfirmed, fixed_time()).is_err());

    let first = record_scar(&repo.paths, &scar_input(&checkpoint.id, "Stay in scope."), fixed_time())
        .expect("first scar");
    let second = record_scar(&repo.paths, &scar_input(&checkpoint.id, "stay  in scope"), fixed_time())
        .expect("second scar");
    assert_eq!(first.task_id, "t1");

    let merged = consolidate(&repo.paths).expect("consolidate");
    assert_eq!(merged, vec![(second.id.clone(), first.id.clone())]);
    let scars = load_scars(&repo.paths).expect("scars");
    assert_eq!(scars.len(), 2);
    assert_eq!(
        active_rules(&scars),
        vec![format!("- Stay in scope. ({})", first.id)]
    );
}
