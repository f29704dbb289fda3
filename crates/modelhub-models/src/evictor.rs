//! Periodic eviction of idle models.
//!
//! The evictor is a background task that sweeps the cache on a fixed
//! interval, independent of request traffic. It shares the cache's sweep
//! throttle with every other caller of [`ModelCache::sweep`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::ModelCache;

/// Where the evictor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictorState {
    /// Between cycles.
    Idle,
    /// Waiting for the next tick.
    Scheduled,
    /// Running a sweep.
    Firing,
    /// Shut down; terminal.
    Stopped,
}

/// Handle to the background eviction task.
pub struct Evictor {
    state: watch::Receiver<EvictorState>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl Evictor {
    /// Start sweeping `cache` every `interval`, evicting models idle for
    /// longer than `max_age`. The first sweep happens one full interval
    /// after start.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(cache: Arc<ModelCache>, interval: Duration, max_age: Duration) -> Self {
        let (state_tx, state) = watch::channel(EvictorState::Idle);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(
                interval_secs = interval.as_secs(),
                max_age_secs = max_age.as_secs(),
                "Model cache evictor started"
            );

            loop {
                state_tx.send_replace(EvictorState::Scheduled);
                tokio::select! {
                    _ = ticker.tick() => {
                        state_tx.send_replace(EvictorState::Firing);
                        let evicted = cache.sweep_older_than(max_age).await;
                        debug!(evicted, "Evictor sweep finished");
                        state_tx.send_replace(EvictorState::Idle);
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            state_tx.send_replace(EvictorState::Stopped);
            info!("Model cache evictor stopped");
        });

        Self {
            state,
            shutdown_tx,
            task,
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> EvictorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EvictorState> {
        self.state.clone()
    }

    /// Stop the task and wait for it to finish. A sweep in progress is
    /// allowed to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Evictor task ended abnormally");
        }
    }
}

impl std::fmt::Debug for Evictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evictor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
