//! driftwatch-service: live monitoring on top of `driftwatch-core`.
//!
//! - `integrity::watcher`   : notify events to path notifications
//! - `integrity::audit_loop`: periodic full re-checks
//! - `session`              : per-root context and the running session

pub mod integrity;
pub mod session;

pub use session::{MonitorContext, MonitorSession};
