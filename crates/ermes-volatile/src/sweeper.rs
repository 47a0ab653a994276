//! Background expiration sweeper.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::payload::PayloadStore;
use crate::store::SessionStore;

impl<P: PayloadStore + 'static> SessionStore<P> {
    /// Spawn a task that sweeps expired sessions every `sweep_interval`
    /// until `cancel` fires.
    ///
    /// Returns `None` when the sweeper is disabled in the configuration.
    pub fn start_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config().enable_sweeper {
            debug!("Expiration sweeper disabled");
            return None;
        }

        let store = self.clone();
        let period = self.config().sweep_interval;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            info!(interval_ms = period.as_millis() as u64, "Expiration sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Expiration sweeper cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired().await;
                        if !removed.is_empty() {
                            info!(count = removed.len(), "Expired sessions removed");
                        }
                    }
                }
            }
        }))
    }
}
