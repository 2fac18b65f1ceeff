//! Serialized notification processing.
//!
//! The dispatcher is the sole owner and writer of the in-memory baseline for
//! a monitoring session. Notifications arrive on a bounded queue and are
//! handled one batch at a time on a single worker:
//!
//! 1. drain the queue (after an optional debounce window),
//! 2. coalesce redundant notifications per path,
//! 3. classify and apply each one in arrival order,
//! 4. persist the baseline (with retries),
//! 5. hand every change to the sink, or mark it unpersisted.
//!
//! Hashing and persistence are blocking, so each batch runs on the blocking
//! pool with the dispatcher moved in and back out. Full re-checks go through
//! the same worker and never interleave with a batch.

use crate::change::{Change, Notification};
use crate::classifier::classify;
use crate::record::Baseline;
use crate::scanner::Scanner;
use crate::settings::MonitorSettings;
use crate::sink::ChangeSink;
use crate::store::BaselineStore;
use crate::{DriftError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub debounce: Duration,
    pub persist_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for DispatcherConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.max(1),
            debounce: settings.debounce(),
            persist_retries: settings.persist_retries,
            retry_backoff: settings.retry_backoff(),
        }
    }
}

/// What one batch (or re-check) produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Notifications taken off the queue.
    pub received: usize,
    /// Notifications left after coalescing.
    pub processed: usize,
    pub changes: Vec<Change>,
    /// False when the baseline could not be written after all retries.
    pub persisted: bool,
}

pub struct EventDispatcher {
    root: PathBuf,
    baseline: Baseline,
    store: BaselineStore,
    scanner: Scanner,
    sink: Arc<dyn ChangeSink>,
    config: DispatcherConfig,
    dirty: bool,
}

impl EventDispatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        baseline: Baseline,
        store: BaselineStore,
        scanner: Scanner,
        sink: Arc<dyn ChangeSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            root: root.into(),
            baseline,
            store,
            scanner,
            sink,
            config,
            dirty: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn into_baseline(self) -> Baseline {
        self.baseline
    }

    /// True when the in-memory baseline has mutations not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Classify one notification and apply its mutation in memory.
    /// Does not persist or report.
    ///
    /// A delete for a directory that still has tracked files beneath it is
    /// expanded into one delete per tracked file. A delete for a path that
    /// is neither tracked nor holds tracked files (an empty directory, an
    /// excluded leftover) reports nothing.
    pub fn apply(&mut self, notification: &Notification) -> Vec<Change> {
        if self.scanner.filter().is_excluded(&notification.path) {
            trace!(path = %notification.path.display(), "excluded notification dropped");
            return vec![];
        }
        if notification.is_delete() && !self.baseline.contains(&notification.path) {
            let nested = self.baseline.paths_under(&notification.path);
            if nested.is_empty() {
                trace!(path = %notification.path.display(), "delete of untracked path dropped");
                return vec![];
            }
            debug!(
                path = %notification.path.display(),
                files = nested.len(),
                "tracked directory removed"
            );
            return nested
                .into_iter()
                .filter_map(|path| self.apply_one(&Notification::deleted(path)))
                .collect();
        }
        self.apply_one(notification).into_iter().collect()
    }

    fn apply_one(&mut self, notification: &Notification) -> Option<Change> {
        let classification = classify(notification, &self.baseline, self.scanner.hasher());
        if self.baseline.apply(classification.mutation) {
            self.dirty = true;
        }
        classification.change
    }

    /// Process a batch: coalesce, classify in order, persist, report.
    pub fn process_batch(&mut self, batch: Vec<Notification>) -> BatchReport {
        let received = batch.len();
        let batch = coalesce(batch);
        let processed = batch.len();
        let changes: Vec<Change> = batch.iter().flat_map(|n| self.apply(n)).collect();
        let flushed = self.flush();
        self.report(&changes, flushed.as_ref().err());

        BatchReport {
            received,
            processed,
            changes,
            persisted: flushed.is_ok(),
        }
    }

    /// Full consistency re-check: scan the root, report every difference
    /// from the owned baseline, then adopt the scan as the new baseline.
    pub fn rescan(&mut self) -> Result<BatchReport> {
        let current = self.scanner.scan(&self.root)?;
        let changes = self.baseline.diff(&current, Utc::now());
        if current != self.baseline {
            self.baseline = current;
            self.dirty = true;
        }
        let flushed = self.flush();
        self.report(&changes, flushed.as_ref().err());
        info!(
            root = %self.root.display(),
            changes = changes.len(),
            "full re-check complete"
        );

        Ok(BatchReport {
            received: 0,
            processed: 0,
            changes,
            persisted: flushed.is_ok(),
        })
    }

    /// Persist the baseline if it has pending mutations. Retries with a
    /// fixed backoff; on final failure the baseline stays dirty so the next
    /// flush tries again.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut attempt = 0u32;
        loop {
            match self.store.save(&self.baseline) {
                Ok(()) => {
                    self.dirty = false;
                    return Ok(());
                }
                Err(e) if attempt < self.config.persist_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "baseline persist failed, retrying");
                    std::thread::sleep(self.config.retry_backoff);
                }
                Err(e) => {
                    error!(error = %e, "baseline persist failed, giving up for this batch");
                    return Err(e);
                }
            }
        }
    }

    fn report(&self, changes: &[Change], persist_error: Option<&DriftError>) {
        for change in changes {
            info!(kind = %change.kind, path = %change.path.display(), "drift detected");
            match persist_error {
                None => {
                    if let Err(e) = self.sink.record(change) {
                        error!(
                            kind = %change.kind,
                            path = %change.path.display(),
                            error = %e,
                            "cannot record change"
                        );
                    }
                }
                Some(err) => self.sink.record_unpersisted(change, err),
            }
        }
    }

    /// Run `f` on the blocking pool with exclusive access to the dispatcher.
    async fn off_thread<T, F>(self, f: F) -> Result<(Self, T)>
    where
        F: FnOnce(&mut Self) -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut dispatcher = self;
            let out = f(&mut dispatcher);
            (dispatcher, out)
        })
        .await
        .map_err(|e| DriftError::Dispatcher(e.to_string()))
    }

    /// Start the worker task. The returned handle feeds it and stops it.
    pub fn spawn(self) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rescan = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx, rescan.clone(), shutdown_rx));

        DispatcherHandle {
            tx,
            rescan,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        mut rx: mpsc::Receiver<Notification>,
        rescan: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Baseline> {
        info!(
            root = %self.root.display(),
            entries = self.baseline.len(),
            "dispatcher started"
        );
        let mut dispatcher = self;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = rescan.notified() => {
                    let (d, result) = dispatcher.off_thread(|d| d.rescan()).await?;
                    dispatcher = d;
                    if let Err(e) = result {
                        warn!(error = %e, "full re-check failed");
                    }
                }
                received = rx.recv() => {
                    let Some(first) = received else {
                        debug!("notification queue closed");
                        break;
                    };
                    let debounce = dispatcher.config.debounce;
                    if !debounce.is_zero() {
                        tokio::time::sleep(debounce).await;
                    }
                    let mut batch = vec![first];
                    while let Ok(n) = rx.try_recv() {
                        batch.push(n);
                    }
                    let (d, report) = dispatcher.off_thread(move |d| d.process_batch(batch)).await?;
                    dispatcher = d;
                    trace!(
                        received = report.received,
                        processed = report.processed,
                        changes = report.changes.len(),
                        "batch processed"
                    );
                }
            }
        }

        // Finish what is already queued and flush before handing back.
        rx.close();
        let mut rest = Vec::new();
        while let Ok(n) = rx.try_recv() {
            rest.push(n);
        }
        let drained = rest.len();
        let (dispatcher, report) = dispatcher.off_thread(move |d| d.process_batch(rest)).await?;
        if !report.persisted {
            warn!("baseline left unpersisted at shutdown");
        }
        info!(drained, entries = dispatcher.baseline.len(), "dispatcher stopped");
        Ok(dispatcher.into_baseline())
    }
}

/// Control surface for a running dispatcher.
pub struct DispatcherHandle {
    tx: mpsc::Sender<Notification>,
    rescan: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<Baseline>>,
}

impl DispatcherHandle {
    /// Queue sender for event sources. Blocking contexts use
    /// `blocking_send`, which applies backpressure instead of dropping.
    pub fn sender(&self) -> mpsc::Sender<Notification> {
        self.tx.clone()
    }

    pub async fn send(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| DriftError::Dispatcher("dispatcher has stopped".into()))
    }

    /// Ask for a full re-check. Requests made while one is pending collapse.
    pub fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    pub fn rescan_trigger(&self) -> Arc<Notify> {
        self.rescan.clone()
    }

    /// Stop the worker, draining queued notifications and flushing the
    /// baseline. Returns the final baseline.
    pub async fn shutdown(self) -> Result<Baseline> {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);
        self.task
            .await
            .map_err(|e| DriftError::Dispatcher(e.to_string()))?
    }
}

/// Drop notifications that cannot change the outcome of a batch.
///
/// Per path, a run of non-delete notifications collapses into the first one
/// (classification reads the file's state at processing time anyway), a run
/// of deletes collapses into one, and a non-delete immediately superseded by
/// a delete is dropped. Delete/recreate sequences survive, and relative order
/// per path is preserved.
pub fn coalesce(batch: Vec<Notification>) -> Vec<Notification> {
    let mut out: Vec<Option<Notification>> = Vec::with_capacity(batch.len());
    let mut history: HashMap<PathBuf, Vec<usize>> = HashMap::new();

    for notification in batch {
        let indices = history.entry(notification.path.clone()).or_default();

        if let Some(&last) = indices.last() {
            let last_is_delete = out[last].as_ref().map(Notification::is_delete).unwrap_or(false);
            if last_is_delete == notification.is_delete() {
                continue;
            }
            if notification.is_delete() {
                out[last] = None;
                indices.pop();
                if let Some(&prev) = indices.last() {
                    if out[prev].as_ref().map(Notification::is_delete).unwrap_or(false) {
                        continue;
                    }
                }
            }
        }

        indices.push(out.len());
        out.push(Some(notification));
    }

    out.into_iter().flatten().collect()
}
