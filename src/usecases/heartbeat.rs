//! Heartbeat Monitor - Periodic Staleness Checks
//!
//! The engine only reacts to events it receives, so silence would go
//! unnoticed without an external ticker. This task posts a `StaleCheck`
//! event at a fixed interval; the actual staleness decision stays in
//! the domain tracker.

use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::clock::Clock;
use crate::usecases::engine::EngineHandle;

/// Drives periodic staleness evaluation.
pub struct HeartbeatMonitor {
    handle: EngineHandle,
    interval_us: u64,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(handle: EngineHandle, interval_us: u64) -> Self {
        Self {
            handle,
            interval_us: interval_us.max(1),
        }
    }

    /// Tick until shutdown is signalled or the engine goes away.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_micros(self.interval_us));
        // A delayed tick must not cause a burst of checks afterwards.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_us = self.interval_us, "Heartbeat monitor started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Heartbeat monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let now_us = Clock::now_monotonic_us();
                    if !self.handle.stale_check(now_us).await {
                        debug!("Engine queue closed, heartbeat monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}
