//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary with HOME pointed at a temporary directory
//! so every run starts from an empty database and queue.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_timeweave-cli"))
        .args(args)
        .env("HOME", home)
        .env_remove("TIMEWEAVE_ENV")
        .env_remove("TIMEWEAVE_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = args.to_vec();
    full.push("--json");
    let (code, stdout, stderr) = run_cli(home, &full);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("valid JSON output")
}

#[test]
fn test_help() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("plan"));
    assert!(stdout.contains("queue"));
}

#[test]
fn test_task_add_and_list() {
    let home = TempDir::new().unwrap();
    let (code, stdout, stderr) = run_cli(home.path(), &["task", "add", "Write report", "-d", "90"]);
    assert_eq!(code, 0, "task add failed: {stderr}");
    assert!(stdout.contains("Task added:"));

    let tasks = run_json(home.path(), &["task", "list"]);
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Write report");
    assert_eq!(tasks[0]["duration_min"], 90);
    assert_eq!(tasks[0]["schedule_status"], "PENDING");
}

#[test]
fn test_task_add_rejects_bad_duration() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["task", "add", "Nothing", "-d", "0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_queue_flush_schedules_task() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["task", "add", "Review", "-d", "60", "--priority", "high"]);
    assert_eq!(code, 0, "task add failed: {stderr}");

    let status = run_json(home.path(), &["queue", "status"]);
    assert_eq!(status.as_array().unwrap().len(), 1);
    assert_eq!(status[0]["trigger_type"], "TASK_ADDED");

    let reports = run_json(home.path(), &["queue", "process", "--flush"]);
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["result"]["strategy"], "INSERTION");

    let tasks = run_json(home.path(), &["task", "list"]);
    assert_eq!(tasks[0]["schedule_status"], "SCHEDULED");

    let details = run_json(home.path(), &["plan", "show"]);
    let events = details["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["end_min"].as_i64().unwrap() - events[0]["start_min"].as_i64().unwrap(), 60);

    let status = run_json(home.path(), &["queue", "status"]);
    assert!(status.as_array().unwrap().is_empty());
}

#[test]
fn test_plan_optimize_and_activate() {
    let home = TempDir::new().unwrap();
    run_cli(home.path(), &["task", "add", "Deep work", "-d", "120"]);

    let optimized = run_json(home.path(), &["plan", "optimize"]);
    assert_eq!(optimized["plan"]["status"], "PROPOSED");
    assert_eq!(optimized["plan"]["version"], 2);
    let proposed_id = optimized["plan"]["id"].as_i64().unwrap().to_string();

    let activated = run_json(home.path(), &["plan", "activate", &proposed_id]);
    assert_eq!(activated["status"], "ACTIVE");

    let plans = run_json(home.path(), &["plan", "list"]);
    let statuses: Vec<&str> = plans
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["status"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"ARCHIVED"));
    assert!(statuses.contains(&"ACTIVE"));
}

#[test]
fn test_availability_set_and_list() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(
        home.path(),
        &["availability", "set", "mon@08:00-12:00*", "wed@13:00-17:00"],
    );
    assert_eq!(code, 0, "availability set failed: {stderr}");

    let view = run_json(home.path(), &["availability", "list", "--from", "2024-01-01", "--days", "7"]);
    assert_eq!(view["using_defaults"], false);
    assert_eq!(view["calendar"].as_array().unwrap().len(), 2);
    // 2024-01-01 is a Monday: one window Monday, one Wednesday
    let windows = view["windows"].as_array().unwrap();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0]["start_min"], 480);
    assert_eq!(windows[0]["is_deep_work"], true);

    let status = run_json(home.path(), &["queue", "status"]);
    assert_eq!(status[0]["trigger_type"], "AVAILABILITY_CHANGE");
}

#[test]
fn test_availability_rejects_bad_slot() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["availability", "set", "mon@12:00-08:00"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_set_and_get() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "scheduler.horizon_days"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "14");

    let (code, _, stderr) = run_cli(home.path(), &["config", "set", "scheduler.horizon_days", "7"]);
    assert_eq!(code, 0, "config set failed: {stderr}");
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "scheduler.horizon_days"]);
    assert_eq!(stdout.trim(), "7");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "scheduler.horizon_days", "0"]);
    assert_eq!(code, 1);
}

#[test]
fn test_completions() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["completions", "bash"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("timeweave"));
}
