use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn driftwatch(data: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("driftwatch").unwrap();
    cmd.arg("--data-dir").arg(data).env("RUST_LOG", "warn");
    cmd
}

/// Helper: a watched tree and a separate data directory.
fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::write(root.join("etc/app.conf"), b"port = 80\n").unwrap();
    fs::write(root.join("README"), b"hello\n").unwrap();
    let data = dir.path().join("data");
    (dir, root, data)
}

fn baseline_file(data: &Path) -> PathBuf {
    let mut files: Vec<_> = fs::read_dir(data.join("baselines"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    files.remove(0)
}

#[test]
fn check_untouched_tree_exits_zero() {
    let (_dir, root, data) = setup();
    driftwatch(&data)
        .arg("baseline")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 files"));

    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("No drift detected"));
}

#[test]
fn check_reports_drift_and_exits_one() {
    let (_dir, root, data) = setup();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();

    fs::write(root.join("etc/app.conf"), b"port = 8080\n").unwrap();
    fs::remove_file(root.join("README")).unwrap();
    fs::write(root.join("dropper.sh"), b"#!/bin/sh\n").unwrap();

    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("CONTENT_CHANGED"))
        .stdout(predicate::str::contains("app.conf"))
        .stdout(predicate::str::contains("DELETED"))
        .stdout(predicate::str::contains("CREATED"));
}

#[test]
fn check_accept_updates_baseline_and_history() {
    let (_dir, root, data) = setup();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();
    fs::write(root.join("README"), b"changed\n").unwrap();

    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .arg("--accept")
        .assert()
        .success()
        .stdout(predicate::str::contains("CONTENT_CHANGED"));

    driftwatch(&data).arg("check").arg(&root).assert().success();

    driftwatch(&data)
        .arg("history")
        .arg("--limit")
        .arg("5")
        .assert()
        .success()
        .stdout(predicate::str::contains("CONTENT_CHANGED"))
        .stdout(predicate::str::contains("README"));
}

#[test]
fn check_json_lists_changes() {
    let (_dir, root, data) = setup();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();
    fs::write(root.join("new.txt"), b"x").unwrap();

    let output = driftwatch(&data)
        .arg("check")
        .arg(&root)
        .arg("--json")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let changes = report["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["kind"], "CREATED");
}

#[test]
#[cfg(unix)]
fn check_reports_permission_change() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, root, data) = setup();
    let conf = root.join("etc/app.conf");
    fs::set_permissions(&conf, fs::Permissions::from_mode(0o644)).unwrap();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();

    fs::set_permissions(&conf, fs::Permissions::from_mode(0o600)).unwrap();
    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("PERMISSIONS_CHANGED"));
}

#[test]
fn baseline_refuses_overwrite_without_force() {
    let (_dir, root, data) = setup();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();
    driftwatch(&data)
        .arg("baseline")
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    driftwatch(&data)
        .arg("baseline")
        .arg(&root)
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn check_without_baseline_fails() {
    let (_dir, root, data) = setup();
    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no baseline"));
}

#[test]
fn corrupt_baseline_is_fatal() {
    let (_dir, root, data) = setup();
    driftwatch(&data).arg("baseline").arg(&root).assert().success();
    fs::write(baseline_file(&data), b"[{\"path\": \"truncated").unwrap();

    driftwatch(&data)
        .arg("check")
        .arg(&root)
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn missing_root_fails() {
    let (dir, _root, data) = setup();
    driftwatch(&data)
        .arg("baseline")
        .arg(dir.path().join("nope"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn settings_exclude_patterns_apply() {
    let (dir, root, data) = setup();
    let config = dir.path().join("settings.json");
    fs::write(&config, br#"{"exclude": ["*.log"]}"#).unwrap();
    driftwatch(&data)
        .arg("--config")
        .arg(&config)
        .arg("baseline")
        .arg(&root)
        .assert()
        .success();

    fs::write(root.join("noise.log"), b"ignored").unwrap();
    driftwatch(&data)
        .arg("--config")
        .arg(&config)
        .arg("check")
        .arg(&root)
        .assert()
        .success();
}

#[test]
fn watch_prompt_rejects_bad_path_and_quits() {
    let (dir, _root, data) = setup();
    let missing = dir.path().join("missing");
    driftwatch(&data)
        .arg("watch")
        .write_stdin(format!("{}\nq\n", missing.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Enter a directory to monitor or type 'q' to quit:",
        ))
        .stderr(predicate::str::contains("is not an existing directory"));
}
