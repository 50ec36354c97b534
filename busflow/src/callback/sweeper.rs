//! Periodic expiry of pending callbacks.

use super::CallbackStore;
use crate::utils::now_utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background task that sweeps a [`CallbackStore`] on a fixed interval.
pub struct CallbackSweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackSweeper {
    /// Spawns the sweeper. The first sweep happens one interval after start.
    ///
    /// Intervals shorter than a millisecond, zero included, are raised to one
    /// millisecond.
    #[must_use]
    pub fn start(store: Arc<CallbackStore>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let interval = interval.max(MIN_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = store.sweep(now_utc()).await;
                        if !expired.is_empty() {
                            debug!(count = expired.len(), "Sweep expired callbacks");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("Callback sweeper stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Returns true while the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the sweeper and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for CallbackSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
