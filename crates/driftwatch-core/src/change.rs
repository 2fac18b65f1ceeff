//! Notifications coming in and classified changes going out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Raw filesystem signal kinds, as delivered by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Created,
    Modified,
    Deleted,
}

/// One raw `(path, kind)` signal from the filesystem-event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub path: PathBuf,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(path: impl Into<PathBuf>, kind: NotificationKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, NotificationKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, NotificationKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, NotificationKind::Deleted)
    }

    pub fn is_delete(&self) -> bool {
        self.kind == NotificationKind::Deleted
    }
}

/// Classification of a drift from the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    ContentChanged,
    PermissionsChanged,
    Created,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentChanged => "CONTENT_CHANGED",
            Self::PermissionsChanged => "PERMISSIONS_CHANGED",
            Self::Created => "CREATED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, reportable drift. Not persisted in the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(serialize_with = "serialize_path_lossy")]
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed_at: DateTime<Utc>,
}

impl Change {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self::observed(path, kind, Utc::now())
    }

    pub fn observed(path: impl Into<PathBuf>, kind: ChangeKind, observed_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at,
        }
    }
}

/// Report paths as text. Bytes that are not valid UTF-8 become U+FFFD; the
/// baseline keeps the exact name.
pub fn serialize_path_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.observed_at.format("%Y-%m-%d_%H:%M:%S%.6f"),
            self.kind,
            self.path.display()
        )
    }
}
