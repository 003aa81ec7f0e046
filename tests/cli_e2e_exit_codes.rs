//! End-to-end tests for CLI exit codes and argument handling.
//!
//! - Exit code 0: Success
//! - Exit code 1: Error, conflicts, or changes found by `diff` and the scans
//! - Exit code 2: Invalid command-line usage (handled by clap)

use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::prelude::*;
use predicates::prelude::*;

#[test]
fn test_help_lists_every_command() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    let assert = cmd.arg("--help").assert().code(0);
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for verb in [
        "initialize",
        "update",
        "add-repo",
        "remove-repo",
        "reset",
        "forwardflow",
        "backflow",
        "resolve",
        "resolve-conflict",
        "cherry-pick",
        "diff",
        "push",
        "scan-cloaked-files",
        "scan-binary-files",
        "generate-tpn",
        "merge-bands",
    ] {
        assert!(output.contains(verb), "--help does not list {}", verb);
    }
}

#[test]
fn test_exit_code_version() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.arg("--version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_global_options_in_help() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.args(["update", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--additional-remotes"))
        .stdout(predicate::str::contains("--tmp"))
        .stdout(predicate::str::contains("--recursive"));
}

#[test]
fn test_exit_code_invalid_subcommand() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.arg("does-not-exist").assert().code(2);
}

#[test]
fn test_exit_code_missing_repository() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.arg("initialize").assert().code(2);
}

#[test]
fn test_exit_code_malformed_reset_target() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.args(["reset", "runtime"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("expected mapping:target"));
}

#[test]
fn test_exit_code_malformed_additional_remote() {
    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.args(["--additional-remotes", "no-separator", "scan-binary-files"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid additional remote"));
}

#[test]
fn test_exit_code_missing_mappings() {
    let temp = assert_fs::TempDir::new().unwrap();

    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.arg("--vmr")
        .arg(temp.path())
        .args(["update", "runtime"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is this the root of a VMR?"));
}

#[test]
fn test_exit_code_invalid_config() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child(".vmr-flow.yaml")
        .write_str("workerCount: 0\n")
        .unwrap();

    let mut cmd = cargo_bin_cmd!("vmr-flow");
    cmd.arg("--vmr")
        .arg(temp.path())
        .arg("scan-binary-files")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("workerCount must be at least 1"));
}
