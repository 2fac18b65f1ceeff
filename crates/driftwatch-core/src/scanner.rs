//! Full-tree scanning.
//!
//! Walks a root directory without following symlinks and produces a record
//! for every regular file. Used to create the first baseline and for full
//! consistency re-checks.

use crate::filter::PathFilter;
use crate::hasher::Hasher;
use crate::record::{Baseline, FileRecord};
use crate::{DriftError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Scanner {
    hasher: Hasher,
    filter: PathFilter,
}

impl Scanner {
    pub fn new(hasher: Hasher, filter: PathFilter) -> Self {
        Self { hasher, filter }
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Resolve `root` to the canonical directory every baseline key is built on.
    pub fn canonical_root(root: &Path) -> Result<PathBuf> {
        let canonical = root
            .canonicalize()
            .map_err(|_| DriftError::PathNotFound(root.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(DriftError::PathNotFound(root.display().to_string()));
        }
        Ok(canonical)
    }

    /// Walk `root` and record every regular file beneath it.
    ///
    /// Files that vanish or become unreadable mid-walk are skipped.
    pub fn scan(&self, root: &Path) -> Result<Baseline> {
        let root = Self::canonical_root(root)?;
        let mut baseline = Baseline::new();
        let mut skipped = 0usize;

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.filter.is_excluded(e.path()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let vanished = e
                        .io_error()
                        .map(|io| io.kind() == std::io::ErrorKind::NotFound)
                        .unwrap_or(false);
                    if !vanished {
                        warn!(error = %e, "cannot walk entry");
                    }
                    skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match FileRecord::observe(entry.path(), &self.hasher) {
                Ok(record) => {
                    baseline.upsert(record);
                }
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping file during scan");
                    skipped += 1;
                }
            }
        }

        info!(
            root = %root.display(),
            files = baseline.len(),
            skipped,
            "scan complete"
        );
        Ok(baseline)
    }
}
