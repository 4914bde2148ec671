//! Capture Feed - Replays Recorded Packet Captures
//!
//! Streams a JSONL capture file (one recorded venue event per line)
//! through the feed port as if it were a live session: packets are
//! stamped with the local monotonic receive time at emission, paced by
//! a configurable inter-packet delay, and interleaved with synthetic
//! heartbeats so the liveness fuse has something to chew on.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::domain::clock::Clock;
use crate::domain::errors::FeedError;
use crate::domain::packet::Packet;
use crate::ports::feed::{FeedHandle, PacketFeed};

/// One recorded venue event in a capture file.
#[derive(Debug, Deserialize)]
struct CaptureRecord {
    /// Venue-assigned sequence number.
    sequence_id: u64,
    /// Venue epoch timestamp in microseconds.
    exchange_ts_us: u64,
    /// Stream topic, e.g. "trade.btcusdt".
    topic: String,
    /// Opaque body, passed through untouched.
    #[serde(default)]
    payload: serde_json::Value,
}

/// Feed adapter replaying a capture file as a live session.
pub struct CaptureFeed {
    /// Capture file to replay.
    path: PathBuf,
    /// Source label stamped into every packet.
    source: String,
    /// Delay between emitted packets (0 = as fast as possible).
    pace_us: u64,
    /// Synthetic heartbeat interval.
    heartbeat_interval_us: u64,
}

impl CaptureFeed {
    /// Create a capture feed from the `[feed]` config section.
    #[must_use]
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            path: PathBuf::from(&config.capture_path),
            source: config.source.clone(),
            pace_us: config.pace_us,
            heartbeat_interval_us: config.heartbeat_interval_us,
        }
    }

    async fn open_capture(&self, handle: &FeedHandle) -> Result<BufReader<File>, FeedError> {
        match File::open(&self.path).await {
            Ok(file) => Ok(BufReader::new(file)),
            Err(e) => {
                let err = FeedError::Connectivity(format!(
                    "capture open failed: {}: {e}",
                    self.path.display()
                ));
                // Boundary contract: the observer hears about it first.
                let _ = handle.fault(err.clone()).await;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl PacketFeed for CaptureFeed {
    #[instrument(skip(self, handle, shutdown), fields(path = %self.path.display()))]
    async fn run(
        &self,
        handle: FeedHandle,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), FeedError> {
        let mut lines = self.open_capture(&handle).await?.lines();

        let session_id = Uuid::new_v4();
        handle
            .session_start(session_id, Clock::now_monotonic_us())
            .await?;
        info!(session_id = %session_id, "Capture session started");

        let mut heartbeat = tokio::time::interval(Duration::from_micros(
            self.heartbeat_interval_us.max(1),
        ));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut exhausted = false;
        let mut emitted: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(emitted, "Capture feed shutting down");
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    handle.heartbeat(Clock::now_monotonic_us()).await?;
                }
                line = lines.next_line(), if !exhausted => {
                    match line {
                        Ok(Some(raw)) => {
                            let raw = raw.trim();
                            if raw.is_empty() {
                                continue;
                            }
                            let record: CaptureRecord = match serde_json::from_str(raw) {
                                Ok(r) => r,
                                Err(e) => {
                                    warn!(error = %e, "Skipping malformed capture row");
                                    continue;
                                }
                            };
                            let packet = Packet::new(
                                record.sequence_id,
                                record.exchange_ts_us,
                                Clock::now_monotonic_us(),
                                self.source.clone(),
                                record.topic,
                                record.payload,
                            );
                            handle.packet(packet).await?;
                            emitted += 1;
                            if self.pace_us > 0 {
                                tokio::time::sleep(Duration::from_micros(self.pace_us)).await;
                            }
                        }
                        Ok(None) => {
                            // Quiet market from here on: keep heartbeating
                            // until shutdown so silence stays distinguishable
                            // from death.
                            info!(emitted, "Capture exhausted");
                            exhausted = true;
                        }
                        Err(e) => {
                            let err = FeedError::Connectivity(format!("capture read failed: {e}"));
                            let _ = handle.fault(err.clone()).await;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.source
    }

    async fn is_healthy(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }
}
