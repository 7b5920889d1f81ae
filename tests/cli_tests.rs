//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the remote-exec binary
fn remote_exec_cmd() -> Command {
    Command::cargo_bin("remote-exec").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    remote_exec_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote workflow tasks"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("namespace"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    remote_exec_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote-exec"))
        .stdout(predicate::str::contains("Branch"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_version_json() {
    let output = remote_exec_cmd().arg("version").arg("--json").output().unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["name"], "remote-exec");
    assert!(info["version"].is_string());
}

#[test]
fn test_short_version_flag() {
    remote_exec_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote-exec"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    remote_exec_cmd()
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[engine]"))
        .stdout(predicate::str::contains("[clusters]"))
        .stdout(predicate::str::contains("[quotas]"))
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_validate_default() {
    // Default config should always be valid
    remote_exec_cmd()
        .arg("config")
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    remote_exec_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").or(predicate::str::contains("Error")));
}

#[test]
fn test_config_init_writes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    remote_exec_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    // Refuses to overwrite without --force
    remote_exec_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure();

    remote_exec_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .arg("--force")
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Namespace Command Tests
// ─────────────────────────────────────────────────────────────────

fn routing_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[clusters]
default_primary_label = "default"

[[clusters.cluster_configs]]
primary_label = "prod-1"
labels = ["teamA"]

[[clusters.cluster_configs]]
primary_label = "prod-2"
labels = ["teamB"]

[[clusters.destination_cluster_configs]]
project = "p"
domain = "d"
cluster_label = "teamB"
"#,
    )
    .unwrap();
    path
}

#[test]
fn test_namespace_resolution() {
    let dir = TempDir::new().unwrap();
    let config = routing_config(&dir);

    let cases: [(&[&str], &str); 3] = [
        (&["--project", "p", "--domain", "d", "--label", "teamA"], "prod-1"),
        (&["--project", "p", "--domain", "d"], "prod-2"),
        (&["--project", "x", "--domain", "y"], "default"),
    ];
    for (args, expected) in cases {
        remote_exec_cmd()
            .arg("namespace")
            .arg("--config")
            .arg(&config)
            .args(args)
            .assert()
            .success()
            .stdout(predicate::str::diff(format!("{}\n", expected)));
    }
}

// ─────────────────────────────────────────────────────────────────
// Run Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_run_help() {
    remote_exec_cmd()
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--tasks"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_run_simulated_tasks() {
    remote_exec_cmd()
        .args(["-q", "run", "-n", "3", "--tick-ms", "5", "--resync-ms", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3/3 tasks succeeded"));
}

#[test]
fn test_run_simulated_failures_json() {
    let output = remote_exec_cmd()
        .args([
            "-q", "run", "-n", "2", "--tick-ms", "5", "--resync-ms", "20", "--outcome", "error", "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let outcomes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let outcomes = outcomes.as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    for outcome in outcomes {
        assert_eq!(outcome["state"]["phase"], "failed");
        assert_eq!(outcome["phase"]["err"]["code"], "DownstreamSystemError");
    }
}

#[test]
fn test_run_with_invalid_config() {
    remote_exec_cmd()
        .arg("run")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    remote_exec_cmd().arg("-v").arg("version").assert().success();
}

#[test]
fn test_quiet_flag() {
    remote_exec_cmd().arg("--quiet").arg("version").assert().success();
}
