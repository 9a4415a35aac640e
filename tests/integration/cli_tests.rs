use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Binary isolated from any opsmend.toml in the caller's cwd or home.
#[allow(deprecated)]
fn opsmend(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("opsmend").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env_remove("RUST_LOG")
        .env_remove("OPSMEND_MAX_RETRIES");
    cmd
}

#[allow(deprecated)]
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("opsmend").unwrap();
    cmd.arg("--version").assert().success();
}

#[allow(deprecated)]
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("opsmend").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("classify"))
        .stdout(predicate::str::contains("respond"));
}

#[test]
fn test_cli_classify_rate_limit() {
    let dir = TempDir::new().unwrap();
    let output = opsmend(&dir)
        .args(["classify", "429 too many requests", "--service", "ads-api"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["type"], "rate_limit");
    assert!(json["errorId"].as_str().unwrap().starts_with("err_"));
}

#[test]
fn test_cli_patterns_filtered_by_tag() {
    let dir = TempDir::new().unwrap();
    let output = opsmend(&dir)
        .args(["patterns", "--tag", "security"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let patterns: Vec<serde_json::Value> = serde_json::from_slice(&output).unwrap();
    assert!(!patterns.is_empty());
    assert!(patterns
        .iter()
        .all(|p| p["tags"].as_array().unwrap().iter().any(|t| t == "security")));
}

#[test]
fn test_cli_config_defaults_and_local_file() {
    let dir = TempDir::new().unwrap();
    opsmend(&dir)
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(defaults)"));

    fs::write(dir.path().join("opsmend.toml"), "[recovery]\nmax_retries = 7\n").unwrap();
    opsmend(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 7"));
}

#[test]
fn test_cli_respond_validation() {
    let dir = TempDir::new().unwrap();
    let output = opsmend(&dir)
        .args(["respond", "validation failed: email is required"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["status"], 400);
    assert_eq!(json["body"]["type"], "validation");
    assert!(json["body"].get("retryAfter").is_none());
}

#[test]
fn test_cli_respond_redacts_secrets() {
    let dir = TempDir::new().unwrap();
    opsmend(&dir)
        .args(["respond", "login failed: password=hunter2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_cli_invalid_config_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[recovery]\nmax_retries = 0\n").unwrap();

    opsmend(&dir)
        .args(["classify", "boom", "--config"])
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("max_retries"));
}

#[test]
fn test_cli_missing_config_file() {
    let dir = TempDir::new().unwrap();
    opsmend(&dir)
        .args(["config", "-c", "does-not-exist.toml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does-not-exist.toml"));
}
