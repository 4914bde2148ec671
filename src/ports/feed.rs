//! Feed Port - Packet Ingestion Interface
//!
//! Defines the boundary between venue adapters and the observer. An
//! adapter produces a session of `Packet` values plus a liveness signal
//! independent of data packets (so silence can be distinguished from a
//! quiet market), and MUST surface every error condition to the
//! observer — retry-and-log without notifying is a contract violation.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::domain::errors::FeedError;
use crate::domain::packet::Packet;
use crate::domain::state::ShutdownMode;

/// Events a feed adapter can emit toward the observer.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A session is established. Resets sequence continuity tracking.
    SessionStart {
        session_id: Uuid,
        started_ts_us: u64,
    },
    /// One normalized exchange event.
    Packet(Packet),
    /// Liveness evidence without data ("quiet market, still alive").
    Heartbeat { ts_us: u64 },
    /// A failure crossing the boundary. Never swallow these.
    Fault(FeedError),
}

/// Everything the single-consumer decision loop processes.
///
/// Feed adapters can only produce the `Feed` variant (enforced by
/// `FeedHandle`); the heartbeat monitor and the shutdown path post the
/// others into the same queue, preserving single-writer discipline.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Feed(FeedEvent),
    /// Periodic staleness evaluation tick.
    StaleCheck { now_us: u64 },
    /// Operator-requested stop.
    Shutdown { mode: ShutdownMode },
}

/// The adapter's only way to talk to the observer.
///
/// Sends block when the bounded queue is full: backpressure stalls the
/// adapter rather than reordering or silently dropping. Every method
/// reports a closed queue as `FeedError::ObserverGone`.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<ObserverEvent>,
}

impl FeedHandle {
    /// Wrap the engine's queue sender. Constructed by the engine.
    #[must_use]
    pub fn new(tx: mpsc::Sender<ObserverEvent>) -> Self {
        Self { tx }
    }

    async fn send(&self, event: FeedEvent) -> Result<(), FeedError> {
        self.tx
            .send(ObserverEvent::Feed(event))
            .await
            .map_err(|_| FeedError::ObserverGone)
    }

    /// Report a successfully established session.
    pub async fn session_start(
        &self,
        session_id: Uuid,
        started_ts_us: u64,
    ) -> Result<(), FeedError> {
        self.send(FeedEvent::SessionStart {
            session_id,
            started_ts_us,
        })
        .await
    }

    /// Deliver one packet, in arrival order.
    pub async fn packet(&self, packet: Packet) -> Result<(), FeedError> {
        self.send(FeedEvent::Packet(packet)).await
    }

    /// Deliver a liveness signal.
    pub async fn heartbeat(&self, ts_us: u64) -> Result<(), FeedError> {
        self.send(FeedEvent::Heartbeat { ts_us }).await
    }

    /// Surface a boundary failure to the observer.
    pub async fn fault(&self, error: FeedError) -> Result<(), FeedError> {
        self.send(FeedEvent::Fault(error)).await
    }
}

/// Trait for venue feed adapters.
///
/// Implementors stream a session of events through the handle until
/// shutdown. Any error condition must either be posted via
/// `FeedHandle::fault` or returned from `run` — never absorbed.
#[async_trait]
pub trait PacketFeed: Send + Sync + 'static {
    /// Stream events until the session ends or shutdown is signalled.
    async fn run(
        &self,
        handle: FeedHandle,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), FeedError>;

    /// Adapter name for logging and metrics labels.
    fn name(&self) -> &str;

    /// Whether the adapter considers its upstream healthy.
    async fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_queue_reports_observer_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = FeedHandle::new(tx);
        let err = tokio_test::block_on(handle.heartbeat(1)).unwrap_err();
        assert_eq!(err, FeedError::ObserverGone);
    }

    #[test]
    fn feed_events_arrive_wrapped() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = FeedHandle::new(tx);
        tokio_test::block_on(handle.packet(Packet::new(
            1,
            2,
            3,
            "test",
            "t",
            serde_json::Value::Null,
        )))
        .unwrap();
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, ObserverEvent::Feed(FeedEvent::Packet(p)) if p.sequence_id == 1));
    }
}
