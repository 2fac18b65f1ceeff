//! Real-time file system watcher using the `notify` crate.
//!
//! Translates OS events for a watched root into path notifications and feeds
//! them to the dispatcher queue. The notify callback runs on the watcher's
//! own thread, so it can block on a full queue instead of dropping events.

use anyhow::{Context, Result};
use driftwatch_core::{Notification, PathFilter};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

/// Watches one root recursively until dropped.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`. Notifications go to `tx`; events that cannot
    /// be mapped to individual files (a directory appearing, a kernel queue
    /// overflow) wake `rescan` instead.
    pub fn start(
        root: &Path,
        filter: PathFilter,
        tx: mpsc::Sender<Notification>,
        rescan: Arc<Notify>,
    ) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if needs_rescan(&event) {
                        debug!(kind = ?event.kind, "event requires a full re-check");
                        rescan.notify_one();
                    }
                    for notification in translate(&event) {
                        if filter.is_excluded(&notification.path) {
                            trace!(path = %notification.path.display(), "excluded event");
                            continue;
                        }
                        if tx.blocking_send(notification).is_err() {
                            debug!("dispatcher queue closed, dropping event");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "file watcher error");
                    rescan.notify_one();
                }
            },
            Config::default(),
        )
        .context("cannot create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("cannot watch {}", root.display()))?;
        info!(root = %root.display(), "watching");

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop delivering events. Dropping the watcher does the same.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            warn!(root = %self.root.display(), error = %e, "unwatch failed");
        }
    }
}

/// Map a notify event onto file notifications.
///
/// Renames become a delete of the old path and a create of the new one.
/// Metadata-only modifications are reported as modifications so permission
/// changes are re-checked.
pub fn translate(event: &Event) -> Vec<Notification> {
    let mut out = Vec::new();

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => {}
        EventKind::Create(_) => {
            out.extend(event.paths.iter().map(Notification::created));
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => out.extend(event.paths.iter().map(Notification::deleted)),
            RenameMode::To => out.extend(event.paths.iter().map(Notification::created)),
            RenameMode::Both if event.paths.len() >= 2 => {
                out.push(Notification::deleted(&event.paths[0]));
                out.push(Notification::created(&event.paths[1]));
            }
            // Backends that cannot tell which side of a rename a path is on.
            _ => {
                for path in &event.paths {
                    if path.symlink_metadata().is_ok() {
                        out.push(Notification::created(path));
                    } else {
                        out.push(Notification::deleted(path));
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            out.extend(event.paths.iter().map(Notification::modified));
        }
        EventKind::Remove(RemoveKind::Folder) => {}
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().map(Notification::deleted));
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out
}

/// Events whose file-level effect cannot be derived from the event alone.
pub fn needs_rescan(event: &Event) -> bool {
    if event.need_rescan() {
        return true;
    }
    match &event.kind {
        // Files inside a directory moved into the root produce no events.
        EventKind::Create(CreateKind::Folder) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().any(|p| p.is_dir()),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).map(|p| p.is_dir()).unwrap_or(false)
        }
        _ => false,
    }
}
