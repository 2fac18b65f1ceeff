use crate::change::Change;
use crate::{DriftError, Result};
use tracing::error;

/// Destination for classified changes.
///
/// `record` is only called once the baseline mutation behind the change has
/// been persisted. When persistence keeps failing the dispatcher calls
/// `record_unpersisted` instead.
pub trait ChangeSink: Send + Sync {
    fn record(&self, change: &Change) -> Result<()>;

    fn record_unpersisted(&self, change: &Change, err: &DriftError) {
        error!(
            kind = %change.kind,
            path = %change.path.display(),
            error = %err,
            "change detected but baseline could not be persisted"
        );
    }
}
