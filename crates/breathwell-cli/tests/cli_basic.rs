//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own HOME so config, database
//! and outbox live in a throwaway directory.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_breathwell"))
        .args(args)
        .env("HOME", home)
        .env_remove("BREATHWELL_ENV")
        .env_remove("BREATHWELL_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn run_json(home: &Path, args: &[&str]) -> serde_json::Value {
    let (code, stdout, stderr) = run_cli(home, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

/// A wire message as the paired device would write it.
fn peer_message(start_secs: f64) -> String {
    serde_json::json!({
        "type": "newSession",
        "startDate": start_secs,
        "endDate": start_secs + 76.0,
        "cyclesCompleted": 4,
        "duration": 76.0,
        "hrvBefore": 40.0,
        "hrvAfter": 50.0,
        "averageHeartRate": -1.0,
        "syncedToHealthKit": true,
        "sourceDevice": "watch"
    })
    .to_string()
}

#[test]
fn test_config_defaults_and_set() {
    let home = tempfile::tempdir().unwrap();

    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "session.total_cycles"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "4");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "session.total_cycles", "6"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "session.total_cycles"]);
    assert_eq!(stdout.trim(), "6");

    let config = run_json(home.path(), &["config", "list"]);
    assert_eq!(config["device"]["kind"], "phone");
}

#[test]
fn test_config_rejects_out_of_range_cycles() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["config", "set", "session.total_cycles", "11"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
}

#[test]
fn test_config_unknown_key_fails() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(home.path(), &["config", "get", "session.nope"]);
    assert_ne!(code, 0);
}

#[test]
fn test_config_path_is_under_home() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().ends_with(".config/breathwell/config.toml"));
    assert!(stdout.starts_with(home.path().to_str().unwrap()));
}

#[test]
fn test_empty_history_and_stats() {
    let home = tempfile::tempdir().unwrap();

    let history = run_json(home.path(), &["history", "list", "--json"]);
    assert_eq!(history, serde_json::json!([]));

    let stats = run_json(home.path(), &["stats", "--json"]);
    assert_eq!(stats["total_sessions"], 0);
    assert_eq!(stats["current_streak"], 0);
    assert_eq!(stats["hrv_trend"], "insufficient_data");
}

#[test]
fn test_import_show_and_delete() {
    let home = tempfile::tempdir().unwrap();
    let inbox = home.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::write(inbox.join("1-a.json"), peer_message(1_700_000_000.0)).unwrap();
    std::fs::write(inbox.join("2-b.json"), peer_message(1_700_000_000.2)).unwrap();
    std::fs::write(inbox.join("3-c.json"), peer_message(1_700_090_000.0)).unwrap();

    let summary = run_json(home.path(), &["sync", "import", inbox.to_str().unwrap()]);
    assert_eq!(summary["inserted"], 2);
    assert_eq!(summary["duplicates"], 1);
    assert_eq!(summary["rejected"], 0);

    let history = run_json(home.path(), &["history", "list", "--json"]);
    let sessions = history.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["source_device"], "watch");
    assert_eq!(sessions[0]["average_heart_rate"], serde_json::Value::Null);

    let id = sessions[0]["id"].as_str().unwrap().to_string();
    let shown = run_json(home.path(), &["history", "show", &id]);
    assert_eq!(shown["cycles_completed"], 4);

    let (code, _, _) = run_cli(home.path(), &["history", "delete", &id]);
    assert_eq!(code, 0);
    let (code, _, _) = run_cli(home.path(), &["history", "show", &id]);
    assert_ne!(code, 0);
}

#[test]
fn test_sync_flush_requires_peer() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["sync", "flush"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("sync.peer_dir"));

    let status = run_json(home.path(), &["sync", "status"]);
    assert_eq!(status["pending"], 0);
}

#[test]
fn test_push_writes_into_peer_directory() {
    let home = tempfile::tempdir().unwrap();
    let inbox = home.path().join("inbox");
    let peer = home.path().join("peer");
    std::fs::create_dir_all(&inbox).unwrap();
    std::fs::create_dir_all(&peer).unwrap();
    std::fs::write(inbox.join("1-a.json"), peer_message(1_700_000_000.0)).unwrap();
    run_json(home.path(), &["sync", "import", inbox.to_str().unwrap()]);

    let (code, _, _) = run_cli(
        home.path(),
        &["config", "set", "sync.peer_dir", peer.to_str().unwrap()],
    );
    assert_eq!(code, 0);

    let history = run_json(home.path(), &["history", "list", "--json"]);
    let id = history[0]["id"].as_str().unwrap().to_string();
    let report = run_json(home.path(), &["sync", "push", &id]);
    assert_eq!(report["delivered"], 1);

    let written: Vec<_> = std::fs::read_dir(&peer)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(written.len(), 1);
}

#[test]
fn test_pattern_inhale_has_eighteen_pulses() {
    let home = tempfile::tempdir().unwrap();
    let pulses = run_json(home.path(), &["pattern", "inhale", "--json"]);
    let pulses = pulses.as_array().unwrap();
    assert_eq!(pulses.len(), 18);
    assert_eq!(pulses[0]["at_ms"], 0);

    let silent = run_json(home.path(), &["pattern", "exhale", "--json"]);
    assert_eq!(silent, serde_json::json!([]));
}

#[test]
fn test_session_rejects_invalid_cycles() {
    let home = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(home.path(), &["session", "run", "--cycles", "0"]);
    assert_ne!(code, 0);
}

#[test]
fn test_completions_generate() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["completions", "bash"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("breathwell"));
}
