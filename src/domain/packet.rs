//! Packet - Normalized Exchange Event
//!
//! The immutable value the core consumes, one per exchange event.
//! Venue adapters own the payload shape; the core only interprets the
//! sequence id and the two timestamps.

use serde::{Deserialize, Serialize};

/// One normalized exchange event.
///
/// `sequence_id` is meaningful only within one logical stream/session;
/// a reconnect starts a new session and resets continuity tracking
/// explicitly, never silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Venue-assigned sequence number, strictly increasing per session.
    pub sequence_id: u64,
    /// Venue wall-clock timestamp, epoch microseconds.
    pub exchange_ts_us: u64,
    /// Local monotonic timestamp stamped at ingestion, microseconds.
    pub received_ts_us: u64,
    /// Originating feed, e.g. "capture", "binance_ws".
    pub source: String,
    /// Stream topic, e.g. "trade.btcusdt".
    pub topic: String,
    /// Opaque market data body. The core never looks inside.
    pub payload: serde_json::Value,
}

impl Packet {
    /// Build a packet from adapter-side fields.
    #[must_use]
    pub fn new(
        sequence_id: u64,
        exchange_ts_us: u64,
        received_ts_us: u64,
        source: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            sequence_id,
            exchange_ts_us,
            received_ts_us,
            source: source.into(),
            topic: topic.into(),
            payload,
        }
    }
}
