//! Basic CLI E2E tests.
//!
//! Each test gets its own data directory, so the envelope and the local
//! sessions table start empty.

use std::path::Path;
use std::process::Command;

/// Run a CLI command against `data_dir` and return (stdout, stderr, code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_clinimon"))
        .args(args)
        .env("CLINIMON_DATA_DIR", data_dir)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_ok(data_dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

fn status_json(data_dir: &Path) -> serde_json::Value {
    let stdout = run_ok(data_dir, &["session", "status", "--json"]);
    serde_json::from_str(&stdout).expect("status --json is valid JSON")
}

#[test]
fn test_status_without_session() {
    let dir = tempfile::tempdir().unwrap();
    let stdout = run_ok(dir.path(), &["session", "status"]);
    assert!(stdout.contains("No active session"));

    let json = status_json(dir.path());
    assert_eq!(json["state"], "idle");
    assert!(json["session_id"].is_null());
}

#[test]
fn test_session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();

    let stdout = run_ok(
        dir.path(),
        &["session", "start", "--client", "c-1", "--type", "therapy", "--title", "Weekly"],
    );
    assert!(stdout.contains("therapy (Weekly)"));

    let json = status_json(dir.path());
    assert_eq!(json["state"], "running");
    assert_eq!(json["controls"]["start"], false);
    assert_eq!(json["controls"]["pause"], true);

    let stdout = run_ok(dir.path(), &["session", "pause"]);
    assert!(stdout.contains("[stopped]"));
    let json = status_json(dir.path());
    assert_eq!(json["state"], "stopped");
    assert!(json["sync"]["last_error"].is_null());

    let stdout = run_ok(dir.path(), &["session", "pause"]);
    assert!(stdout.contains("timer is not running"));

    run_ok(dir.path(), &["session", "start"]);
    assert_eq!(status_json(dir.path())["state"], "running");

    let stdout = run_ok(dir.path(), &["session", "finish", "--notes", "good progress", "--yes"]);
    assert!(stdout.contains("finished after"));

    let json = status_json(dir.path());
    assert!(json["session_id"].is_null());
}

#[test]
fn test_finish_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["session", "start", "--client", "c-1", "--type", "intake"]);

    // stdin is closed, so the prompt reads no answer.
    let (stdout, stderr, code) = run_cli(dir.path(), &["session", "finish", "--notes", "n"]);
    assert_eq!(code, 1);
    assert!(stdout.contains("Finish intake session with c-1"));
    assert!(stderr.contains("finish cancelled"));

    assert_eq!(status_json(dir.path())["session_type"], "intake");
}

#[test]
fn test_client_name_from_config() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["config", "list"]);
    std::fs::write(
        dir.path().join("config.toml"),
        "[[clients]]\nid = \"c-7\"\nname = \"Ana Souza\"\n",
    )
    .unwrap();

    run_ok(dir.path(), &["session", "start", "--client", "c-7", "--type", "therapy"]);
    let json = status_json(dir.path());
    assert_eq!(json["client_name"], "Ana Souza");
    assert_eq!(json["client_sessions"], 0);
}

#[test]
fn test_client_totals_include_local_sessions() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["config", "list"]);
    std::fs::write(
        dir.path().join("config.toml"),
        "[[clients]]\nid = \"c-7\"\nname = \"Ana Souza\"\nbirth_date = \"1990-04-02\"\n\
         total_sessions = 4\n",
    )
    .unwrap();

    run_ok(dir.path(), &["session", "start", "--client", "c-7", "--type", "therapy"]);
    run_ok(dir.path(), &["session", "finish", "--yes"]);
    run_ok(dir.path(), &["session", "start", "--client", "c-7", "--type", "therapy"]);

    let stdout = run_ok(dir.path(), &["session", "status"]);
    assert!(stdout.contains("Client:   Ana Souza (born 1990-04-02, 5 sessions)"));
}

#[test]
fn test_second_start_with_client_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["session", "start", "--client", "c-1", "--type", "therapy"]);

    let (_, stderr, code) = run_cli(
        dir.path(),
        &["session", "start", "--client", "c-2", "--type", "therapy"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("already active"));
}

#[test]
fn test_start_without_session_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["session", "start"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("no active session"));
}

#[test]
fn test_calendar_session_needs_id() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(
        dir.path(),
        &["session", "start", "--client", "c-1", "--type", "therapy", "--source", "calendar"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("--id"));

    run_ok(
        dir.path(),
        &[
            "session", "start", "--client", "c-1", "--type", "therapy", "--source", "calendar",
            "--id", "appt-42",
        ],
    );
    assert_eq!(status_json(dir.path())["session_id"], "appt-42");
}

#[test]
fn test_reset_zeroes_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["session", "start", "--client", "c-1", "--type", "therapy"]);

    let stdout = run_ok(dir.path(), &["session", "reset"]);
    assert!(stdout.contains("00:00:00 [stopped]"));

    let json = status_json(dir.path());
    assert_eq!(json["state"], "stopped");
    assert_eq!(json["elapsed_seconds"], 0);
}

#[test]
fn test_watch_prints_ticks() {
    let dir = tempfile::tempdir().unwrap();
    run_ok(dir.path(), &["session", "start", "--client", "c-1", "--type", "therapy"]);

    let stdout = run_ok(dir.path(), &["session", "watch", "--seconds", "2"]);
    assert!(stdout.contains("[running]"));
}

#[test]
fn test_config_get_set() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "timer.sync_interval_secs"]).trim(), "30");

    run_ok(dir.path(), &["config", "set", "timer.sync_interval_secs", "15"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "timer.sync_interval_secs"]).trim(), "15");

    let listing = run_ok(dir.path(), &["config", "list"]);
    assert!(listing.contains("storage.envelope_key = active_monitoring_session"));

    let (_, stderr, code) = run_cli(dir.path(), &["config", "get", "timer.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Unknown configuration key"));

    run_ok(dir.path(), &["config", "reset"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "timer.sync_interval_secs"]).trim(), "30");
}
