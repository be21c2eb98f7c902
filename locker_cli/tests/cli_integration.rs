use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[locker]
name = "hutch-sim"

[channels]
device_base = "LAS:SIM:01:"
phase_motor = "LAS:SIM:01:PHASE"
laser_trigger = "TRIG:SIM:01:TDES"
counter = "CNTR:SIM:01:"
"#;
    let path = dir.path().join("locker.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[test]
fn help_prints_usage() {
    Command::cargo_bin("locker_cli")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn check_config_reports_the_installation() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    Command::cargo_bin("locker_cli")
        .unwrap()
        .args(["--config", cfg.to_str().unwrap(), "check-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hutch-sim"))
        .stdout(predicate::str::contains("Gen1"));
}

#[test]
fn missing_config_file_is_an_error() {
    Command::cargo_bin("locker_cli")
        .unwrap()
        .args(["--config", "/does/not/exist.toml", "check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading config"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    // gen2 requires a trigger-width channel
    fs::write(
        &path,
        r#"
[locker]
name = "hutch-sim"
generation = "gen2"

[channels]
device_base = "LAS:SIM:02:"
phase_motor = "LAS:SIM:02:PHASE"
laser_trigger = "TRIG:SIM:02:TDES"
counter = "CNTR:SIM:02:"
"#,
    )
    .unwrap();
    Command::cargo_bin("locker_cli")
        .unwrap()
        .args(["--config", path.to_str().unwrap(), "check-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading config"));
}

#[test]
fn run_without_a_backend_fails_fast() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    Command::cargo_bin("locker_cli")
        .unwrap()
        .args(["--config", cfg.to_str().unwrap(), "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--sim"));
}
