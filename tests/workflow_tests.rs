//! End-to-end workflow tests
//!
//! Drives the binary through whole runs against a temp data directory.
//! Every invocation is a fresh process, so each step also exercises
//! resuming from the latest snapshot.

mod common;

use common::{Workspace, CHAIN_GOAL};
use predicates::prelude::*;

const NAMING_RULES: &str = r#"
[[rule]]
name = "snake-case-module"
kind = "naming-convention"
field = "module"
pattern = "^[a-z][a-z0-9_]*$"
message = "module must be snake_case"
"#;

// ─────────────────────────────────────────────────────────────────
// Dependency Ordering
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_approving_dependency_assigns_dependent() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);

    assert_eq!(ws.task_status(&run, "t1"), "IN_PROGRESS");
    assert_eq!(ws.task_status(&run, "t2"), "PENDING");

    let ckpt = ws.submit(&run, "t1", r#"{"module": "handler"}"#);
    assert_eq!(ws.task_status(&run, "t1"), "UNDER_REVIEW");

    ws.cmd()
        .args(["decide", &ckpt, "approve", "--reviewer", "dana"])
        .assert()
        .success()
        .stdout(predicate::str::contains("APPROVED"));

    assert_eq!(ws.task_status(&run, "t1"), "APPROVED");
    assert_eq!(ws.task_status(&run, "t2"), "IN_PROGRESS");
    assert_eq!(ws.task(&run, "t2")["capability"], "coder");
}

#[test]
fn test_run_completes_when_every_task_is_approved() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);

    for task in ["t1", "t2"] {
        let ckpt = ws.submit(&run, task, r#"{"module": "handler"}"#);
        ws.run(&["decide", &ckpt, "approve"]);
    }

    assert_eq!(ws.status(&run)["status"], "COMPLETED");
    ws.cmd()
        .args(["runs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"))
        .stdout(predicate::str::contains("2/2 approved"));
}

#[test]
fn test_cyclic_goal_is_rejected_whole() {
    let ws = Workspace::new();
    let goal = ws.write(
        "cycle.toml",
        r#"
[[task]]
id = "a"
depends_on = ["c"]

[[task]]
id = "b"
depends_on = ["a"]

[[task]]
id = "c"
depends_on = ["b"]
"#,
    );

    ws.cmd()
        .args(["start", "--goal", goal.to_str().unwrap()])
        .assert()
        .code(50)
        .stderr(predicate::str::contains("E500"));
    assert_eq!(ws.run(&["runs"]), "No runs.");
}

// ─────────────────────────────────────────────────────────────────
// Capability Matching
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_blocked_task_unblocks_on_registration() {
    let ws = Workspace::new();
    let run = ws.start(
        r#"
[[task]]
id = "ui"
requires = ["typescript", "react"]
"#,
    );
    assert_eq!(ws.task_status(&run, "ui"), "BLOCKED_NO_CAPABILITY");

    // A partial match does not qualify
    ws.register("ts-only", &["typescript"]);
    assert_eq!(ws.task_status(&run, "ui"), "BLOCKED_NO_CAPABILITY");

    let file = ws.write(
        "web.toml",
        "id = \"web\"\nspecialization = [\"typescript\", \"react\", \"css\"]\ncontext_scope = \"project-wide\"\n",
    );
    ws.cmd()
        .args(["capability", "register", "--file", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("web registered"))
        .stdout(predicate::str::contains(format!("{}/ui assigned", run)));

    assert_eq!(ws.task_status(&run, "ui"), "IN_PROGRESS");
    assert_eq!(ws.task(&run, "ui")["capability"], "web");
}

#[test]
fn test_capability_list_by_tags_orders_by_specificity() {
    let ws = Workspace::new();
    ws.register("generalist", &["rust", "api", "sql"]);
    ws.register("backend", &["rust", "api"]);
    ws.register("web", &["ts"]);

    let listed = ws.run(&["capability", "list", "--tags", "rust,api"]);
    let ids: Vec<&str> = listed
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    assert_eq!(ids, vec!["backend", "generalist"]);

    assert_eq!(
        ws.run(&["capability", "list", "--tags", "cobol"]),
        "No capability covers those tags."
    );
}

#[test]
fn test_conflicting_reregistration_is_refused() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);

    let file = ws.write(
        "coder-py.toml",
        "id = \"coder\"\nspecialization = [\"python\"]\ncontext_scope = \"module\"\n",
    );
    ws.cmd()
        .args(["capability", "register", "--file", file.to_str().unwrap()])
        .assert()
        .code(60);

    ws.cmd()
        .args(["capability", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rust"))
        .stdout(predicate::str::contains("python").not());
}

#[test]
fn test_capability_in_use_cannot_be_deregistered() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);

    ws.cmd()
        .args(["capability", "deregister", "coder"])
        .assert()
        .code(60)
        .stderr(predicate::str::contains(format!("{}/t1", run)));

    ws.run(&["abort", &run]);
    ws.run(&["capability", "deregister", "coder"]);
    assert_eq!(ws.run(&["capability", "list"]), "No capabilities registered.");
}

// ─────────────────────────────────────────────────────────────────
// Checkpoints
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_rule_failure_rejects_before_review() {
    let ws = Workspace::with_rules(NAMING_RULES);
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);

    let artifact = ws.write("bad.json", r#"{"module": "HandlerModule"}"#);
    ws.cmd()
        .args(["submit", &run, "t1", "--artifact", artifact.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("REJECTED"))
        .stdout(predicate::str::contains("module must be snake_case"));

    let t1 = ws.task(&run, "t1");
    assert_eq!(t1["status"], "IN_PROGRESS");
    assert_eq!(t1["rework_count"], 1);
    assert_eq!(t1["checkpoint"]["state"], "REJECTED");
    assert_eq!(
        t1["checkpoint"]["rejection_reason"],
        "module must be snake_case"
    );

    let history = ws.run(&["history", &run, "--json"]);
    let journal: serde_json::Value = serde_json::from_str(&history).unwrap();
    let reached_review = journal
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["subject"] == t1["checkpoint"]["id"] && r["to"] == "AWAITING_REVIEW");
    assert!(!reached_review);
}

#[test]
fn test_human_rejection_reassigns_to_another_capability() {
    let ws = Workspace::new();
    ws.register("alpha", &["rust"]);
    ws.register("beta", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    assert_eq!(ws.task(&run, "t1")["capability"], "alpha");

    let ckpt = ws.submit(&run, "t1", r#"{"module": "handler"}"#);
    ws.cmd()
        .args(["decide", &ckpt, "reject", "--reason", "needs more detail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("REJECTED"));

    let t1 = ws.task(&run, "t1");
    assert_eq!(t1["status"], "IN_PROGRESS");
    assert_eq!(t1["capability"], "beta");
    assert_eq!(t1["checkpoint"]["rejection_reason"], "needs more detail");

    // The old checkpoint is closed; the resubmission opens a new one
    ws.cmd()
        .args(["decide", &ckpt, "approve"])
        .assert()
        .code(40);
    let second = ws.submit(&run, "t1", r#"{"module": "handler"}"#);
    assert_ne!(second, ckpt);
}

#[test]
fn test_claimed_checkpoint_only_accepts_its_reviewer() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    let ckpt = ws.submit(&run, "t1", r#"{"module": "handler"}"#);

    ws.run(&["claim", &ckpt, "--reviewer", "dana"]);
    ws.cmd()
        .args(["decide", &ckpt, "approve", "--reviewer", "sam"])
        .assert()
        .code(40);
    ws.run(&["decide", &ckpt, "approve", "--reviewer", "dana"]);
    assert_eq!(ws.task(&run, "t1")["checkpoint"]["reviewer"], "dana");
}

#[test]
fn test_escalate_with_nothing_overdue_is_quiet() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    ws.submit(&run, "t1", r#"{"module": "handler"}"#);

    assert_eq!(ws.run(&["escalate"]), "");
    assert_eq!(ws.task(&run, "t1")["checkpoint"]["decision"], "PENDING");
}

// ─────────────────────────────────────────────────────────────────
// Run Control
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_aborting_one_task_aborts_its_siblings() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(
        r#"
description = "two independent tasks"

[[task]]
id = "t1"
requires = ["rust"]

[[task]]
id = "t2"
requires = ["rust"]
"#,
    );
    let ckpt = ws.submit(&run, "t2", "{\"summary\": \"draft\"}");

    ws.run(&["abort", &run, "--task", "t1"]);
    assert_eq!(ws.task_status(&run, "t2"), "ABORTED");
    ws.cmd().args(["decide", &ckpt, "approve"]).assert().code(40);
    ws.run(&["capability", "deregister", "coder"]);
}

#[test]
fn test_abort_keeps_approved_tasks() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    let ckpt = ws.submit(&run, "t1", r#"{"module": "handler"}"#);
    ws.run(&["decide", &ckpt, "approve"]);

    ws.cmd()
        .args(["abort", &run])
        .assert()
        .success()
        .stdout(predicate::str::contains("t2 ABORTED"))
        .stdout(predicate::str::contains("t1").not());

    assert_eq!(ws.task_status(&run, "t1"), "APPROVED");
    assert_eq!(ws.task_status(&run, "t2"), "ABORTED");
    assert_eq!(ws.status(&run)["status"], "ABORTED");
}

#[test]
fn test_suspended_run_refuses_work_until_resumed() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    ws.run(&["suspend", &run]);

    let artifact = ws.write("t1.json", r#"{"module": "handler"}"#);
    ws.cmd()
        .args(["submit", &run, "t1", "--artifact", artifact.to_str().unwrap()])
        .assert()
        .code(40);

    ws.run(&["resume", &run]);
    assert_eq!(ws.status(&run)["status"], "RUNNING");
    ws.submit(&run, "t1", r#"{"module": "handler"}"#);
    assert_eq!(ws.task_status(&run, "t1"), "UNDER_REVIEW");
}

#[test]
fn test_add_tasks_extends_running_run() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);

    let batch = ws.write(
        "subtasks.toml",
        r#"
[[task]]
id = "t1-tests"
parent = "t1"
requires = ["rust"]
"#,
    );
    ws.cmd()
        .args(["add-tasks", &run, "--file", batch.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("t1-tests"));
    assert_eq!(ws.task_status(&run, "t1-tests"), "IN_PROGRESS");

    // Same id again is a duplicate
    ws.cmd()
        .args(["add-tasks", &run, "--file", batch.to_str().unwrap()])
        .assert()
        .code(40);
}

#[test]
fn test_every_transition_leaves_a_snapshot() {
    let ws = Workspace::new();
    ws.register("coder", &["rust"]);
    let run = ws.start(CHAIN_GOAL);
    ws.submit(&run, "t1", r#"{"module": "handler"}"#);

    let dir = ws.data_dir().join("runs").join(&run);
    let mut files: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    files.sort();
    assert_eq!(
        files,
        vec!["00000000000000000001.json", "00000000000000000002.json"]
    );
    assert_eq!(ws.status(&run)["sequence"], 2);
}

#[test]
fn test_unknown_run_is_not_found() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["status", "run-missing"])
        .assert()
        .code(40)
        .stderr(predicate::str::contains("not found"));
}
