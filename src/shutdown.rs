use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator for the relay
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// A receiver that observes `true` once shutdown begins
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        if !*self.sender.borrow() {
            info!("Initiating graceful shutdown");
        }
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for Ctrl-C, then trigger shutdown
    pub async fn wait_for_signal(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        self.trigger();
        Ok(())
    }

    /// Await background tasks, giving up after `limit`. Returns how many
    /// finished in time.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, limit: Duration) -> usize {
        let total = handles.len();
        let mut finished = 0;

        let waited = timeout(limit, async {
            for handle in handles {
                match handle.await {
                    Ok(()) => finished += 1,
                    Err(e) => warn!("Background task ended abnormally: {}", e),
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                finished = finished,
                total = total,
                "Timeout waiting for background tasks to finish"
            );
        } else {
            info!(finished = finished, "Graceful shutdown completed");
        }
        finished
    }
}
