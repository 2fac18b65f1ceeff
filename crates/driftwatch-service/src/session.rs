//! Monitoring sessions and one-shot baseline operations for a single root.

use crate::integrity::audit_loop::{spawn_audit_loop, AuditLoopHandle};
use crate::integrity::watcher::FileWatcher;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use driftwatch_core::dispatcher::{DispatcherConfig, DispatcherHandle, EventDispatcher};
use driftwatch_core::{
    Baseline, BaselineStore, Change, ChangeLog, ChangeSink, DriftError, Hasher, MonitorSettings,
    PathFilter, Scanner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything resolved for one watched root: canonical path, where its
/// baseline and change log live, and the scanner configured for it.
#[derive(Debug, Clone)]
pub struct MonitorContext {
    pub root: PathBuf,
    pub baseline_path: PathBuf,
    pub log_dir: PathBuf,
    pub settings: MonitorSettings,
    filter: PathFilter,
    scanner: Scanner,
    store: BaselineStore,
}

impl MonitorContext {
    pub fn resolve(root: &Path, settings: MonitorSettings, data_dir: &Path) -> Result<Self> {
        let root = Scanner::canonical_root(root)?;
        let baseline_path = settings.baseline_path_for(data_dir, &root);
        let log_dir = settings.log_dir_for(data_dir);
        let filter = settings.path_filter(&root, &baseline_path, &log_dir)?;
        let scanner = Scanner::new(
            Hasher::with_buffer_size(settings.hash_buffer_bytes),
            filter.clone(),
        );
        let store = BaselineStore::new(&baseline_path);

        Ok(Self {
            root,
            baseline_path,
            log_dir,
            settings,
            filter,
            scanner,
            store,
        })
    }

    pub fn open_log(&self) -> Result<ChangeLog> {
        ChangeLog::in_dir(&self.log_dir, self.settings.max_log_bytes)
            .with_context(|| format!("cannot open change log in {}", self.log_dir.display()))
    }

    /// Scan the root and persist the result as its baseline. Refuses to
    /// replace an existing baseline unless `force` is set.
    pub fn build_baseline(&self, force: bool) -> Result<Baseline> {
        if self.store.exists() && !force {
            bail!(
                "baseline already exists at {} (use --force to replace it)",
                self.baseline_path.display()
            );
        }
        let baseline = self.scanner.scan(&self.root)?;
        self.store.save(&baseline)?;
        info!(
            root = %self.root.display(),
            entries = baseline.len(),
            path = %self.baseline_path.display(),
            "baseline written"
        );
        Ok(baseline)
    }

    /// Compare the tree against its stored baseline. With `accept`, the scan
    /// becomes the new baseline and every change is written to the log.
    pub fn check(&self, accept: bool) -> Result<Vec<Change>> {
        let stored = self.store.load()?.ok_or_else(|| {
            anyhow!(
                "no baseline for {}; run `driftwatch baseline` first",
                self.root.display()
            )
        })?;
        let current = self.scanner.scan(&self.root)?;
        let changes = stored.diff(&current, Utc::now());

        if accept && !changes.is_empty() {
            self.store.save(&current)?;
            let log = self.open_log()?;
            for change in &changes {
                log.record(change)?;
            }
            info!(changes = changes.len(), "drift accepted into baseline");
        }
        Ok(changes)
    }

    /// Stored baseline, or a fresh scan saved as the baseline. The flag is
    /// true when the baseline was just built.
    fn load_or_build(&self) -> Result<(Baseline, bool)> {
        match self.store.load()? {
            Some(baseline) => Ok((baseline, false)),
            None => {
                info!(root = %self.root.display(), "no baseline yet, scanning");
                Ok((self.build_baseline(true)?, true))
            }
        }
    }
}

/// Change log sink that also prints each change to stdout.
pub struct EchoingLog(ChangeLog);

impl EchoingLog {
    pub fn new(log: ChangeLog) -> Self {
        Self(log)
    }
}

impl ChangeSink for EchoingLog {
    fn record(&self, change: &Change) -> driftwatch_core::Result<()> {
        self.0.record(change)?;
        println!("{change}");
        Ok(())
    }

    fn record_unpersisted(&self, change: &Change, err: &DriftError) {
        warn!(
            kind = %change.kind,
            path = %change.path.display(),
            error = %err,
            "change detected but baseline could not be persisted"
        );
        println!("{change} (not persisted)");
    }
}

/// A running monitor: dispatcher worker, OS watcher and optional audit loop.
pub struct MonitorSession {
    root: PathBuf,
    handle: DispatcherHandle,
    watcher: Option<FileWatcher>,
    audit: Option<AuditLoopHandle>,
}

/// A freshly built baseline always gets one re-check once the watcher is
/// live, since files written during the initial scan raise no event. A
/// loaded baseline is re-checked only when configured to.
fn needs_catch_up(fresh: bool, settings: &MonitorSettings) -> bool {
    fresh || settings.rescan_on_start
}

impl MonitorSession {
    /// Start monitoring. With `echo`, changes are also printed to stdout.
    pub async fn start(context: MonitorContext, echo: bool) -> Result<Self> {
        let log = context.open_log()?;
        let log: Arc<dyn ChangeSink> = if echo {
            Arc::new(EchoingLog::new(log))
        } else {
            Arc::new(log)
        };

        let ctx = context.clone();
        let (baseline, fresh) = tokio::task::spawn_blocking(move || ctx.load_or_build())
            .await
            .context("baseline load task failed")??;

        let MonitorContext {
            root,
            settings,
            filter,
            scanner,
            store,
            ..
        } = context;

        let dispatcher = EventDispatcher::new(
            &root,
            baseline,
            store,
            scanner,
            log,
            DispatcherConfig::from(&settings),
        );
        let handle = dispatcher.spawn();

        // The watcher starts before the catch-up check so nothing that
        // happens between the baseline scan and the first event is lost.
        let watcher = match FileWatcher::start(&root, filter, handle.sender(), handle.rescan_trigger()) {
            Ok(w) => w,
            Err(e) => {
                if let Err(stop_err) = handle.shutdown().await {
                    warn!(error = %stop_err, "dispatcher shutdown failed");
                }
                return Err(e);
            }
        };
        if needs_catch_up(fresh, &settings) {
            handle.request_rescan();
        }
        let audit = settings
            .audit_interval()
            .map(|interval| spawn_audit_loop(handle.rescan_trigger(), interval));

        info!(root = %root.display(), fresh, "monitoring session started");
        Ok(Self {
            root,
            handle,
            watcher: Some(watcher),
            audit,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_rescan(&self) {
        self.handle.request_rescan();
    }

    /// Stop the watcher first so no new events arrive, then drain and flush
    /// the dispatcher. Returns the final baseline.
    pub async fn stop(mut self) -> Result<Baseline> {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(audit) = self.audit.take() {
            audit.stop().await;
        }
        let baseline = self.handle.shutdown().await?;
        info!(root = %self.root.display(), entries = baseline.len(), "monitoring session stopped");
        Ok(baseline)
    }
}
