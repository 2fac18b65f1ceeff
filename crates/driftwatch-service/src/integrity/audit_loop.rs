//! Periodic integrity audit loop.
//!
//! Asks the dispatcher for a full re-check at a fixed interval. Catches what
//! the watcher cannot see: changes while the process was paused, network
//! filesystems, dropped kernel events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Control handle for a running audit loop.
pub struct AuditLoopHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AuditLoopHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the audit loop. Each tick wakes `rescan`; the dispatcher runs the
/// re-check on its own worker, so ticks never overlap with batches.
pub fn spawn_audit_loop(rescan: Arc<Notify>, interval: Duration) -> AuditLoopHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "audit loop started");
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the session already checked
        // the tree on start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("audit loop: requesting full re-check");
                    rescan.notify_one();
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("audit loop shutting down");
                        return;
                    }
                }
            }
        }
    });

    AuditLoopHandle { shutdown_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ticks_wake_rescan_until_stopped() {
        let rescan = Arc::new(Notify::new());
        let handle = spawn_audit_loop(rescan.clone(), Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(5), rescan.notified())
            .await
            .expect("audit loop never requested a re-check");

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("audit loop did not stop");
    }
}
