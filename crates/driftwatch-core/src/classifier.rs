//! Notification classification.
//!
//! Turns one `(path, kind)` notification plus the current baseline into at
//! most one [`Change`] and the [`BaselineMutation`] that brings the baseline
//! up to date. The whole transition table lives in [`classify`].

use crate::change::{Change, ChangeKind, Notification, NotificationKind};
use crate::hasher::Hasher;
use crate::record::{Baseline, BaselineMutation, FileRecord};
use tracing::{debug, trace};

/// Outcome of classifying a single notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub change: Option<Change>,
    pub mutation: BaselineMutation,
}

impl Classification {
    fn unchanged() -> Self {
        Self {
            change: None,
            mutation: BaselineMutation::None,
        }
    }

    fn deleted(notification: &Notification, tracked: bool) -> Self {
        Self {
            change: Some(Change::new(&notification.path, ChangeKind::Deleted)),
            mutation: if tracked {
                BaselineMutation::Remove(notification.path.clone())
            } else {
                BaselineMutation::None
            },
        }
    }
}

/// Classify `notification` against `baseline`.
///
/// Never fails: a file that cannot be read is a deletion race, not a fault.
pub fn classify(notification: &Notification, baseline: &Baseline, hasher: &Hasher) -> Classification {
    let existing = baseline.get(&notification.path);

    if notification.kind == NotificationKind::Deleted {
        return Classification::deleted(notification, existing.is_some());
    }

    let current = match FileRecord::observe(&notification.path, hasher) {
        Ok(record) => record,
        Err(e) => {
            return match existing {
                Some(_) if e.is_transient_read() => {
                    debug!(
                        path = %notification.path.display(),
                        error = %e,
                        "tracked file unreadable, treating as deleted"
                    );
                    Classification::deleted(notification, true)
                }
                _ => {
                    trace!(path = %notification.path.display(), error = %e, "ignoring unreadable path");
                    Classification::unchanged()
                }
            };
        }
    };

    let kind = match existing {
        None => ChangeKind::Created,
        Some(existing) => match existing.drift_to(&current) {
            Some(kind) => kind,
            None => return Classification::unchanged(),
        },
    };

    Classification {
        change: Some(Change::new(&notification.path, kind)),
        mutation: BaselineMutation::Upsert(current),
    }
}
