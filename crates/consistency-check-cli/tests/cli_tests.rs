//! CLI integration tests for consistency-check.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for configuration errors. None of them reach a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the consistency-check binary.
fn cmd() -> Command {
    Command::cargo_bin("consistency-check").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

const VALID_CONFIG: &str = r#"
reference:
  type: mysql
  host: 127.0.0.1
  port: 1
  database: shop
  user: checker
  password: secret
targets:
  - type: postgres
    host: 127.0.0.1
    port: 2
    database: shop
    user: checker
    password: secret
"#;

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("init-store"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_check_subcommand_help() {
    cmd()
        .args(["check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("--method"))
        .stdout(predicate::str::contains("--schema"))
        .stdout(predicate::str::contains("--table"))
        .stdout(predicate::str::contains("--row-from"))
        .stdout(predicate::str::contains("--row-till"))
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--chunk-pause"))
        .stdout(predicate::str::contains("--granularity"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--show-rows"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("consistency-check"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--progress"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_short_config_flag() {
    cmd()
        .args(["-c", "some_config.yaml", "--help"])
        .assert()
        .success();
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let file = config_file("invalid: yaml: content: [\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_config_without_targets_exits_with_code_1() {
    let file = config_file(
        "reference:\n  type: mysql\n  host: db\n  database: shop\n  user: u\n",
    );
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at least one target"));
}

#[test]
fn test_invalid_method_override_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "check",
            "--method",
            "crc",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid check method 'crc'"));
}

#[test]
fn test_invalid_mode_override_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "check",
            "--mode",
            "sideways",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("check.mode"));
}

#[test]
fn test_invalid_chunk_size_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "check",
            "--chunk-size",
            "0",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("chunk size"));
}

#[test]
fn test_zero_granularity_exits_with_code_1() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "check",
            "--granularity",
            "0",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("granularity"));
}

#[test]
fn test_unreachable_nodes_are_unhealthy() {
    let file = config_file(VALID_CONFIG);
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "health-check",
        ])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"healthy\": false"));
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
