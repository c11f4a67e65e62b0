//! Runs the `rollgate` binary against fleet files whose transport commands
//! are local shell snippets.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_rollgate");

fn fleet(check_service: &str) -> String {
    format!(
        r#"
[options]
max_attempts = 2
retry_delay = "0s"
settle_time = "0s"
per_attempt_timeout = "5s"

[commands]
deploy = "true"
reload-proxy = "true"
restart-service = "true"
check-service = "{check_service}"

[targets]
loadbalancer = [{{ name = "lb", address = "127.0.0.1", service = "proxy" }}]
backend = [
  {{ name = "b1", address = "127.0.0.1", service = "app1" }},
  {{ name = "b2", address = "127.0.0.1", service = "app2" }},
]
"#
    )
}

fn write_fleet(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("rollgate.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn rollgate(config: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn healthy_fleet_exits_zero_and_writes_report() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("true"));
    let report = dir.path().join("report.json");

    let out = rollgate(&config, &["check", "--report", report.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("status:   succeeded"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(summary["status"], "succeeded");
    assert_eq!(summary["scope"], "full");
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["targets"].as_array().unwrap().len(), 3);
}

#[test]
fn missing_subcommand_runs_full_check() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("true"));

    let out = rollgate(&config, &["--format", "json"]);
    assert_eq!(out.status.code(), Some(0));
    let summary: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(summary["scope"], "full");
    assert_eq!(summary["total_phases"], 10);
}

#[test]
fn unhealthy_backend_exits_one() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("test {service} != app2"));

    let out = rollgate(&config, &["backend", "--format", "json"]);
    assert_eq!(out.status.code(), Some(1));

    let summary: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    // Restarting does not make app2 pass its check.
    assert_eq!(summary["status"], "failed");
    assert_eq!(summary["failures"][0]["kind"], "health_check_timeout");
    assert_eq!(summary["failures"][0]["target"], "b2");
}

#[test]
fn events_file_is_appended_as_json_lines() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("true"));
    let events = dir.path().join("events.jsonl");
    let events_arg = events.to_str().unwrap();

    assert_eq!(rollgate(&config, &["api", "--events", events_arg]).status.code(), Some(0));
    let first = std::fs::read_to_string(&events).unwrap().lines().count();
    assert!(first > 0);

    assert_eq!(rollgate(&config, &["api", "--events", events_arg]).status.code(), Some(0));
    let content = std::fs::read_to_string(&events).unwrap();
    assert_eq!(content.lines().count(), first * 2);
    for line in content.lines() {
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(event["event"].is_string());
    }
}

#[test]
fn missing_config_exits_two() {
    let dir = TempDir::new().unwrap();
    let out = rollgate(&dir.path().join("absent.toml"), &[]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("absent.toml"));
}

#[test]
fn empty_fleet_exits_two() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, "[targets]\n");
    assert_eq!(rollgate(&config, &[]).status.code(), Some(2));
}

#[test]
fn scope_without_targets_exits_two() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(
        &dir,
        "[targets]\nloadbalancer = [{ address = \"127.0.0.1\", service = \"proxy\" }]\n",
    );
    assert_eq!(rollgate(&config, &["backend"]).status.code(), Some(2));
}

#[test]
fn zero_attempts_override_exits_two() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("true"));
    assert_eq!(
        rollgate(&config, &["--max-attempts", "0"]).status.code(),
        Some(2)
    );
}

#[test]
fn unknown_command_exits_one() {
    let dir = TempDir::new().unwrap();
    let config = write_fleet(&dir, &fleet("true"));
    let out = rollgate(&config, &["deploy-everything"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!out.stderr.is_empty());
}

#[test]
fn help_exits_zero() {
    let out = Command::new(BIN).arg("help").output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("backend"));
}
