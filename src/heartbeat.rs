use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Logs a liveness line every `period` until `shutdown` is cancelled.
/// Keeps hosting platforms with idle timeouts from reaping the process.
pub fn spawn(period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Heartbeat stopped");
                    break;
                }
                _ = ticker.tick() => {
                    info!("Heartbeat: relay alive");
                }
            }
        }
    })
}
