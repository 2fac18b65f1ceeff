//! Live monitoring sessions against a real watcher.
//!
//! Tests cover:
//!  1. Edits while running are logged and persisted
//!  2. Drift while stopped is caught by the start-up re-check
//!  3. A first session with no baseline builds one silently

use driftwatch_core::{BaselineStore, ChangeKind, ChangeLog, MonitorSettings};
use driftwatch_service::{MonitorContext, MonitorSession};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

fn settings() -> MonitorSettings {
    MonitorSettings {
        debounce_ms: 10,
        retry_backoff_ms: 10,
        ..MonitorSettings::default()
    }
}

fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    let data = dir.path().join("data");
    (dir, root, data)
}

/// Poll the change log until `pred` holds or five seconds pass.
async fn wait_for_log<F>(log_dir: &Path, pred: F) -> Vec<(PathBuf, ChangeKind)>
where
    F: Fn(&[(PathBuf, ChangeKind)]) -> bool,
{
    let mut seen = Vec::new();
    for _ in 0..250 {
        if log_dir.exists() {
            let log = ChangeLog::in_dir(log_dir, 1 << 20).unwrap();
            seen = log
                .read_recent(None, None)
                .unwrap()
                .into_iter()
                .rev()
                .map(|e| (e.path, e.kind))
                .collect();
            if pred(&seen) {
                return seen;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    seen
}

// ─── Test 1: live edits ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_edits_are_logged_and_persisted() {
    let (_dir, root, data) = setup();
    let context = MonitorContext::resolve(&root, settings(), &data).unwrap();
    let log_dir = context.log_dir.clone();
    let baseline_path = context.baseline_path.clone();
    let root = context.root.clone();

    let session = MonitorSession::start(context, false).await.unwrap();
    // Give the OS watch a moment to settle.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let new_file = root.join("b.txt");
    fs::write(&new_file, b"beta").unwrap();
    let seen = wait_for_log(&log_dir, |s| s.iter().any(|(p, _)| p == &new_file)).await;
    assert!(
        seen.contains(&(new_file.clone(), ChangeKind::Created)),
        "log: {seen:?}"
    );

    let final_baseline = session.stop().await.unwrap();
    assert!(final_baseline.contains(&new_file));
    let on_disk = BaselineStore::new(&baseline_path).load().unwrap().unwrap();
    assert_eq!(on_disk, final_baseline);
}

// ─── Test 2: start-up re-check ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drift_while_stopped_is_reported_on_start() {
    let (_dir, root, data) = setup();
    let context = MonitorContext::resolve(&root, settings(), &data).unwrap();
    context.build_baseline(false).unwrap();
    let log_dir = context.log_dir.clone();
    let edited = context.root.join("a.txt");

    fs::write(&edited, b"alpha, changed offline").unwrap();

    let session = MonitorSession::start(context, false).await.unwrap();
    let seen = wait_for_log(&log_dir, |s| !s.is_empty()).await;
    session.stop().await.unwrap();

    assert_eq!(seen, vec![(edited, ChangeKind::ContentChanged)]);
}

// ─── Test 3: first session ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_session_builds_baseline_without_reporting() {
    let (_dir, root, data) = setup();
    let context = MonitorContext::resolve(&root, settings(), &data).unwrap();
    let baseline_path = context.baseline_path.clone();
    let log_dir = context.log_dir.clone();

    let session = MonitorSession::start(context, false).await.unwrap();
    assert!(baseline_path.exists());
    let final_baseline = session.stop().await.unwrap();

    assert_eq!(final_baseline.len(), 1);
    let log = ChangeLog::in_dir(&log_dir, 1 << 20).unwrap();
    assert!(log.read_recent(None, None).unwrap().is_empty());
}
