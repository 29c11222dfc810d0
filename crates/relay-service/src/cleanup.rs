//! Periodic removal of expired and revoked sessions.

use relay_core::sessions::SessionAuthority;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Send `true` on `shutdown_tx` to stop the loop.
pub struct CleanupHandle {
    pub shutdown_tx: watch::Sender<bool>,
}

impl CleanupHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

pub fn spawn_cleanup_loop(
    sessions: Arc<SessionAuthority>,
    interval: Duration,
) -> (JoinHandle<()>, CleanupHandle) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "session cleanup loop started");
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("session cleanup loop shutting down");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }

            let removed = sessions.cleanup();
            debug!(removed, remaining = sessions.len(), "session cleanup pass");
        }
    });

    (handle, CleanupHandle { shutdown_tx })
}
