//! Integration tests for the command line.
//!
//! These tests only exercise paths that finish before the daemon connects to
//! a message bus, so they run without D-Bus or polkit.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a Command for the daemon binary
fn daemon() -> Command {
    Command::cargo_bin("ubuntu-advantage-desktop-daemon").unwrap()
}

#[test]
fn test_help_command() {
    daemon()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ubuntu Advantage desktop daemon"))
        .stdout(predicate::str::contains("--replace"))
        .stdout(predicate::str::contains("--status-path"))
        .stdout(predicate::str::contains("--status-source"))
        .stdout(predicate::str::contains("--session"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_version_command() {
    daemon()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_status_source() {
    daemon()
        .args(["--status-source", "network"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("network"));
}

#[test]
fn test_config_path_is_directory() {
    let dir = tempfile::tempdir().unwrap();
    daemon()
        .arg("--config")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_malformed_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[status\nsource = ").unwrap();
    daemon()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}

#[test]
fn test_invalid_config_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[bus]\nname = \"not a bus name\"").unwrap();
    daemon()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid bus name"));
}

#[test]
fn test_relative_status_path_rejected() {
    let dir = tempfile::tempdir().unwrap();
    daemon()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["--status-path", "status.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("status path must be absolute"));
}

#[test]
fn test_status_path_override_checked_after_file() {
    // The file's relative path is replaced by the flag, so validation moves
    // on and stops at the bad bus name instead.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[status]\npath = \"status.json\"\n\n[bus]\nname = \"not a bus name\""
    )
    .unwrap();
    daemon()
        .arg("--config")
        .arg(file.path())
        .args(["--status-path", "/run/ua/status.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid bus name"))
        .stderr(predicate::str::contains("status path must be absolute").not());
}

#[test]
fn test_invalid_log_level() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[logging]\nlevel = \"loud\"").unwrap();
    daemon()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level: loud"));
}
