//! CLI end-to-end tests.

use assert_cmd::prelude::*;
use ds_media::testing::{BlockSpec, MkvBuilder};
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn directstream_cmd() -> Command {
    Command::cargo_bin("directstream").unwrap()
}

fn write_episode(dir: &std::path::Path) -> std::path::PathBuf {
    let data = MkvBuilder::new()
        .title("Pilot")
        .duration_ms(4000.0)
        .ass_track(2)
        .cluster(
            0,
            vec![
                BlockSpec::group(2, 100, b"1,0,Default,,0,0,0,,Hello".to_vec(), 900),
                BlockSpec::group(2, 2000, b"2,0,Default,,0,0,0,,World".to_vec(), 900),
            ],
        )
        .build();
    let path = dir.join("pilot.mkv");
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    directstream_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    directstream_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("directstream"));
}

#[test]
fn test_cli_probe_prints_metadata() {
    let dir = tempdir().unwrap();
    let path = write_episode(dir.path());
    directstream_cmd()
        .arg("probe")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("S_TEXT/ASS"));
}

#[test]
fn test_cli_probe_missing_file() {
    directstream_cmd()
        .args(["probe", "/nonexistent/file.mkv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_subtitles_emits_json_lines() {
    let dir = tempdir().unwrap();
    let path = write_episode(dir.path());
    let output = directstream_cmd()
        .arg("subtitles")
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["text"], "Hello");
    assert_eq!(events[1]["text"], "World");
}

#[test]
fn test_cli_validate_reports_invalid_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();
    directstream_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_cli_validate_accepts_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{}").unwrap();
    directstream_cmd()
        .arg("validate")
        .arg(&path)
        .assert()
        .success();
}
