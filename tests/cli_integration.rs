//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Get the binary to test.
fn gsdbot() -> Command {
    let mut cmd = Command::cargo_bin("gsdbot").unwrap();
    cmd.env_remove("GITHUB_TOKEN").env_remove("GH_TOKEN").env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    gsdbot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("planning bot"));
}

#[test]
fn test_short_help_flag() {
    gsdbot().arg("-h").assert().success().stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    gsdbot()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_milestone_command_help() {
    gsdbot()
        .args(["milestone", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--issue"))
        .stdout(predicate::str::contains("--sender"));
}

#[test]
fn test_answer_command_help() {
    gsdbot()
        .args(["answer", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--milestone"));
}

// ============================================================================
// Parse Command Tests
// ============================================================================

#[test]
fn test_parse_leading_number() {
    gsdbot()
        .args(["parse", "--", "7", "Add", "OAuth2", "login"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""mode": "traditional""#))
        .stdout(predicate::str::contains(r#""number": 7"#))
        .stdout(predicate::str::contains(r#""description": "Add OAuth2 login""#));
}

#[test]
fn test_parse_long_flag() {
    gsdbot()
        .args(["parse", "--", "--milestone", "5", "Build", "authentication", "system"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""number": 5"#))
        .stdout(predicate::str::contains("Build authentication system"));
}

#[test]
fn test_parse_short_flag_in_the_middle() {
    gsdbot()
        .args(["parse", "--", "Billing", "-m", "2", "page"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""number": 2"#))
        .stdout(predicate::str::contains(r#""description": "Billing page""#));
}

#[test]
fn test_parse_without_number_is_delegated() {
    gsdbot()
        .args(["parse", "--", "Build", "a", "login", "system"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""mode": "delegated""#))
        .stdout(predicate::str::contains("Build a login system"));
}

#[test]
fn test_parse_number_without_description_fails() {
    gsdbot()
        .args(["parse", "--", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("description is required"));
}

#[test]
fn test_parse_milestone_zero_fails() {
    gsdbot()
        .args(["parse", "--", "0", "Nothing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("start at 1"));
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn test_config_path_flag() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("gsdbot.toml");
    config.write_str("[git]\nbranch_prefix = \"milestone/\"\n").unwrap();

    gsdbot()
        .arg("--config")
        .arg(config.path())
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gsdbot.toml"));
}

#[test]
fn test_config_display_from_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("gsdbot.toml");
    config
        .write_str("[git]\nbranch_prefix = \"milestone/\"\n\n[state]\nbackend = \"local\"\n")
        .unwrap();

    gsdbot()
        .current_dir(temp.path())
        .arg("--config")
        .arg(config.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"branch_prefix = "milestone/""#))
        .stdout(predicate::str::contains(r#"backend = "local""#))
        .stdout(predicate::str::contains("[[requirements.questions]]"));
}

#[test]
fn test_config_defaults_in_empty_dir() {
    let temp = assert_fs::TempDir::new().unwrap();

    gsdbot()
        .current_dir(temp.path())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"branch_prefix = "gsd/""#));
}

#[test]
fn test_invalid_config_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    let config = temp.child("broken.toml");
    config.write_str("[git\nbranch_prefix = ").unwrap();

    gsdbot().arg("--config").arg(config.path()).arg("config").assert().failure();
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_invalid_subcommand() {
    gsdbot().arg("nonexistent-command").assert().failure();
}

#[test]
fn test_milestone_requires_issue() {
    gsdbot()
        .args(["milestone", "--", "7", "Add", "OAuth2", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--issue"));
}

#[test]
fn test_milestone_without_token_fails() {
    let temp = assert_fs::TempDir::new().unwrap();

    gsdbot()
        .current_dir(temp.path())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path())
        .args(["milestone", "--issue", "1", "--sender", "mona", "--", "7", "Add", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No GitHub token found"));
}

#[test]
fn test_milestone_requires_sender() {
    gsdbot()
        .args(["milestone", "--issue", "1", "--", "7", "Add", "OAuth2", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--sender"));
}

#[test]
fn test_answer_requires_sender() {
    gsdbot()
        .args(["answer", "--issue", "1", "--milestone", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--sender"));
}

#[test]
fn test_blank_sender_is_refused() {
    gsdbot()
        .env("GITHUB_TOKEN", "test-token")
        .args(["milestone", "--issue", "1", "--sender", " ", "--", "7", "Add", "login"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--sender must name the commenter"));
}

// ============================================================================
// Completions Tests
// ============================================================================

#[test]
fn test_completions_bash() {
    gsdbot()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gsdbot"));
}

#[test]
fn test_completions_zsh() {
    gsdbot().args(["completions", "zsh"]).assert().success();
}
