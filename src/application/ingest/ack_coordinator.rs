//! Acknowledgement Coordinator
//!
//! Counts acknowledgement obligations: one per stream entry that has been
//! durably written but not yet confirmed against the stream. Shutdown waits
//! on the count reaching zero.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct AckCoordinator {
    outstanding: Arc<watch::Sender<usize>>,
}

impl Default for AckCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AckCoordinator {
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            outstanding: Arc::new(outstanding),
        }
    }

    /// Register `count` new obligations.
    pub fn add(&self, count: usize) {
        if count > 0 {
            self.outstanding.send_modify(|n| *n += count);
        }
    }

    /// Resolve one obligation.
    pub fn done(&self) {
        self.outstanding.send_modify(|n| {
            if *n == 0 {
                tracing::error!("Acknowledgement resolved with no outstanding obligation");
            } else {
                *n -= 1;
            }
        });
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Resolve once every registered obligation has been resolved.
    pub async fn wait(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// [`wait`](Self::wait) bounded by `limit`. On timeout, returns how many
    /// obligations were still open.
    pub async fn wait_timeout(&self, limit: Duration) -> Result<(), usize> {
        tokio::time::timeout(limit, self.wait())
            .await
            .map_err(|_| self.outstanding())
    }
}
