//! Path exclusion for scans and live notifications.

use crate::store::STAGING_PREFIX;
use crate::{DriftError, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};

/// Decides which paths under a root are never tracked.
///
/// Glob patterns match the root-relative path. Ignored paths cover the
/// monitor's own files (baseline, staging files, change log) so that writing
/// them never feeds back into the event stream.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    root: PathBuf,
    patterns: Vec<Pattern>,
    ignored: Vec<PathBuf>,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        for p in patterns {
            let pattern = Pattern::new(p.as_ref())
                .map_err(|e| DriftError::Config(format!("bad exclude pattern {:?}: {e}", p.as_ref())))?;
            self.patterns.push(pattern);
        }
        Ok(self)
    }

    /// Ignore `path` and everything beneath it.
    pub fn ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignored.push(path.into());
        self
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        if path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(STAGING_PREFIX))
            .unwrap_or(false)
        {
            return true;
        }
        if self.patterns.is_empty() {
            return false;
        }
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        self.patterns.iter().any(|p| p.matches_path(rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_match_relative_paths() {
        let filter = PathFilter::new("/srv/app")
            .with_patterns(&["*.swp", "cache/**"])
            .unwrap();
        assert!(filter.is_excluded(Path::new("/srv/app/notes.swp")));
        assert!(filter.is_excluded(Path::new("/srv/app/cache/a/b.bin")));
        assert!(!filter.is_excluded(Path::new("/srv/app/src/main.rs")));
    }

    #[test]
    fn test_ignored_paths_and_staging_files() {
        let filter = PathFilter::new("/srv/app")
            .ignore("/srv/app/.driftwatch/baseline.json")
            .ignore("/srv/app/logs");
        assert!(filter.is_excluded(Path::new("/srv/app/.driftwatch/baseline.json")));
        assert!(filter.is_excluded(Path::new("/srv/app/logs/changes.log")));
        assert!(filter.is_excluded(Path::new("/srv/app/.driftwatch-staging-x1.json")));
        assert!(!filter.is_excluded(Path::new("/srv/app/logsheet.csv")));
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = PathFilter::new("/").with_patterns(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, DriftError::Config(_)));
    }
}
