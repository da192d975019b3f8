//! Shutdown coordination for the listener.
//!
//! A [`ShutdownHandle`] is a cloneable latch: any clone can trigger it and
//! every clone can wait for it. `listen_for_ctrl_c` wires it to Ctrl+C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// A handle for triggering or awaiting shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Triggers a shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown is triggered.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Only fails when every sender is gone, and this handle holds one.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Spawns a task that triggers shutdown on Ctrl+C.
    pub fn listen_for_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Received Ctrl+C, initiating shutdown");
                        handle.trigger();
                    }
                    Err(e) => debug!(error = %e, "Ctrl+C handler unavailable"),
                },
                _ = handle.wait() => {}
            }
            debug!("Signal listener stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_is_seen_by_clones() {
        let handle = ShutdownHandle::new();
        let other = handle.clone();
        assert!(!other.is_shutdown());

        handle.trigger();
        handle.trigger();

        assert!(other.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), other.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_completes_after_trigger() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();
        let wait_task = tokio::spawn(async move {
            waiter.wait().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!wait_task.is_finished());
        handle.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), wait_task).await;
        assert!(result.unwrap().unwrap());
    }
}
