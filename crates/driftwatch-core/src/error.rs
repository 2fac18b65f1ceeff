//! Error types for the drift engine.

use std::path::PathBuf;

/// Result type for drift engine operations
pub type Result<T> = std::result::Result<T, DriftError>;

/// Errors produced by the baseline store, scanner and dispatcher
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persisted baseline exists but cannot be trusted. Never recovered by
    /// starting from an empty baseline.
    #[error("baseline {} is corrupt: {reason}", path.display())]
    BaselineCorrupt { path: PathBuf, reason: String },

    #[error("cannot persist baseline to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a regular file: {0}")]
    NotRegularFile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatcher failure: {0}")]
    Dispatcher(String),
}

impl DriftError {
    /// True for errors that mean "the file is gone or unreadable right now",
    /// which the classifier treats as a deletion race rather than a fault.
    pub fn is_transient_read(&self) -> bool {
        matches!(self, DriftError::Io(_) | DriftError::NotRegularFile(_))
    }
}
