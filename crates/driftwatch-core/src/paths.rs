use crate::{DriftError, Result};
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "driftwatch";
pub const APP_NAME: &str = "driftwatch";

/// Environment override for the data directory.
pub const DATA_DIR_ENV: &str = "DRIFTWATCH_DATA_DIR";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| DriftError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

/// Default baseline location for a canonical watched root. One file per
/// root, so monitoring different trees never mixes their records.
pub fn baseline_path(data_dir: &Path, root: &Path) -> PathBuf {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    let name = format!("{}.json", &hex::encode(digest)[..16]);
    data_dir.join("baselines").join(name)
}
