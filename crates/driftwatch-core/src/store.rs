//! On-disk baseline persistence.
//!
//! The baseline is a JSON array of records sorted by path. Writes go to a
//! staging file in the same directory which is fsynced and renamed over the
//! target, so a crash never leaves a truncated baseline behind.

use crate::record::Baseline;
use crate::{DriftError, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name prefix of in-flight baseline writes.
pub const STAGING_PREFIX: &str = ".driftwatch-staging-";

#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted baseline. `Ok(None)` means no baseline has been
    /// written yet; anything unreadable is [`DriftError::BaselineCorrupt`].
    pub fn load(&self) -> Result<Option<Baseline>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DriftError::BaselineCorrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let baseline: Baseline =
            serde_json::from_slice(&data).map_err(|e| DriftError::BaselineCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            path = %self.path.display(),
            entries = baseline.len(),
            "baseline loaded"
        );
        Ok(Some(baseline))
    }

    /// Atomically replace the persisted baseline.
    pub fn save(&self, baseline: &Baseline) -> Result<()> {
        self.write_atomic(baseline).map_err(|source| DriftError::Persistence {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            entries = baseline.len(),
            "baseline saved"
        );
        Ok(())
    }

    fn write_atomic(&self, baseline: &Baseline) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".json")
            .tempfile_in(&parent)?;
        {
            let mut writer = BufWriter::new(staging.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, baseline)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        staging.as_file().sync_all()?;
        staging.persist(&self.path).map_err(|e| e.error)?;
        fsync_dir(&parent);
        Ok(())
    }
}

fn fsync_dir(path: &Path) {
    #[cfg(unix)]
    {
        match fs::OpenOptions::new().read(true).open(path) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    warn!(path = %path.display(), error = %e, "cannot fsync baseline directory");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cannot open baseline directory"),
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
