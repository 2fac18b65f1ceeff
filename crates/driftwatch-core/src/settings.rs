use crate::filter::PathFilter;
use crate::paths;
use crate::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Monitor configuration. Every field has a default, so a partial
/// `settings.json` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    /// Baseline file; defaults to a per-root file under the data directory.
    pub baseline_path: Option<PathBuf>,
    /// Change log directory; defaults to `<data_dir>/logs`.
    pub log_dir: Option<PathBuf>,
    /// Glob patterns, relative to the watched root, that are never tracked.
    pub exclude: Vec<String>,
    pub queue_capacity: usize,
    pub debounce_ms: u64,
    /// Full re-check period. 0 disables the periodic audit.
    pub audit_interval_secs: u64,
    /// Re-check the tree against a loaded baseline when a session starts.
    pub rescan_on_start: bool,
    pub persist_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_log_bytes: u64,
    pub hash_buffer_bytes: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            baseline_path: None,
            log_dir: None,
            exclude: vec![],
            queue_capacity: 1024,
            debounce_ms: 100,
            audit_interval_secs: 0,
            rescan_on_start: true,
            persist_retries: 3,
            retry_backoff_ms: 200,
            max_log_bytes: 5 * 1024 * 1024,
            hash_buffer_bytes: crate::hasher::BUFFER_SIZE,
        }
    }
}

impl MonitorSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let settings: Self = serde_json::from_slice(&data)
            .map_err(|e| DriftError::Config(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path` if given, else `<data_dir>/settings.json` if present,
    /// else defaults.
    pub fn resolve(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default_path = paths::settings_path(data_dir);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DriftError::Config("queue_capacity must be at least 1".into()));
        }
        if self.max_log_bytes == 0 {
            return Err(DriftError::Config("max_log_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn baseline_path_for(&self, data_dir: &Path, root: &Path) -> PathBuf {
        self.baseline_path
            .clone()
            .unwrap_or_else(|| paths::baseline_path(data_dir, root))
    }

    pub fn log_dir_for(&self, data_dir: &Path) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| paths::log_dir(data_dir))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn audit_interval(&self) -> Option<Duration> {
        (self.audit_interval_secs > 0).then(|| Duration::from_secs(self.audit_interval_secs))
    }

    /// Exclusion filter for `root`, with the monitor's own files ignored.
    pub fn path_filter(&self, root: &Path, baseline_path: &Path, log_dir: &Path) -> Result<PathFilter> {
        Ok(PathFilter::new(root)
            .with_patterns(&self.exclude)?
            .ignore(absolute(baseline_path))
            .ignore(absolute(log_dir)))
    }
}

// Paths under a symlinked parent still compare equal to the watcher's
// canonical event paths.
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(p) => p.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}
