//! Background sweep of expired counter entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::CounterStore;
use crate::clock::Clock;

/// Shortest period the sweep loop will run at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically purges expired entries from a [`CounterStore`].
///
/// Lazy expiry only replaces an entry when its key is accessed again; the
/// sweeper bounds memory for keys that never come back.
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Intervals below [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn spawn(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let interval = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Sweep interval too short, using the minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };

        info!(interval_ms = interval.as_millis() as u64, "Starting counter sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.purge_expired(clock.now()) {
                            Ok(0) => {}
                            Ok(removed) => {
                                debug!(removed, remaining = store.len(), "Swept expired counters")
                            }
                            Err(e) => warn!(error = %e, "Counter sweep failed"),
                        }
                    }
                }
            }

            info!("Counter sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle controlling a running [`Sweeper`].
///
/// Dropping the handle aborts the task; [`SweeperHandle::shutdown`] stops it
/// cleanly and waits for it to finish.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the sweep loop to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Counter sweeper task ended abnormally");
            }
        }
    }

    /// Whether the sweep task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
