//! Background expiry of uploads nobody picked up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::transfer::TransferManager;

#[derive(Clone, Debug)]
pub struct ReaperConfig {
    /// Maximum age of an entry that has not been downloaded.
    pub ttl: Duration,
    /// Time between sweeps. An entry is gone at most `ttl + sweep_interval`
    /// after it was created.
    pub sweep_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Handle to a running reaper. Dropping it stops the loop.
pub struct ReaperHandle {
    shutdown: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Spawn the sweep loop on the current runtime.
///
/// The first sweep runs one full interval after startup.
pub fn spawn_reaper(manager: Arc<TransferManager>, config: ReaperConfig) -> ReaperHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let task = tokio::spawn(reaper_loop(manager, config, shutdown_rx));
    ReaperHandle {
        shutdown: shutdown_tx,
        task,
    }
}

async fn reaper_loop(
    manager: Arc<TransferManager>,
    config: ReaperConfig,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + config.sweep_interval, config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Reaper started (ttl {}s, sweep every {}s)",
        config.ttl.as_secs(),
        config.sweep_interval.as_secs()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // Ok after shutdown(), Err once the handle is dropped
            _ = shutdown.changed() => {
                info!("Reaper shutting down");
                return;
            }
        }

        let reclaimed = manager.sweep_expired(config.ttl).await;
        if reclaimed > 0 {
            info!("Reaper removed {reclaimed} expired uploads");
        } else {
            debug!("Reaper sweep found nothing to expire");
        }
    }
}
