//! driftwatch-core: baseline and drift engine for file-integrity monitoring.
//!
//! A baseline maps every regular file under a watched root to its SHA-256
//! content hash, size and permission bits. Notifications about individual
//! paths are classified against that baseline into changes, the baseline is
//! updated in place and persisted atomically.
//!
//! # Modules
//! - `hasher`    : streaming SHA-256 of file contents
//! - `record`    : file records and the in-memory baseline
//! - `store`     : atomic JSON persistence of a baseline
//! - `scanner`   : full recursive scan of a root
//! - `classifier`: notification + baseline -> change + mutation
//! - `dispatcher`: serialized, batched processing of notifications
//! - `event_log` : rotating JSON-lines change log

pub mod change;
pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod event_log;
pub mod filter;
pub mod hasher;
pub mod paths;
pub mod record;
pub mod scanner;
pub mod settings;
pub mod sink;
pub mod store;

pub use change::{Change, ChangeKind, Notification, NotificationKind};
pub use classifier::{classify, Classification};
pub use dispatcher::{DispatcherConfig, DispatcherHandle, EventDispatcher};
pub use error::{DriftError, Result};
pub use event_log::ChangeLog;
pub use filter::PathFilter;
pub use hasher::{ContentHash, Hasher};
pub use record::{Baseline, BaselineMutation, FileRecord, Permissions};
pub use scanner::Scanner;
pub use settings::MonitorSettings;
pub use sink::ChangeSink;
pub use store::BaselineStore;
