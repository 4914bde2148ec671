//! Typed error taxonomy for the observer core.
//!
//! Fuse-detected conditions (drift, gaps, staleness) are NOT errors —
//! they are signals interpreted by the state machine. Errors here are
//! the failures that cross component boundaries: an uncalibrated clock,
//! an adapter that lost its session, a journal that cannot persist.

use thiserror::Error;

/// Clock failures. Startup-only: once calibration completes this can no
/// longer occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Drift was requested before `Clock::calibrate` completed.
    #[error("clock calibration has not completed")]
    CalibrationNotReady,
}

/// Failures originating at the adapter boundary.
///
/// The boundary contract forbids swallowing these: a feed must surface
/// every error condition to the observer, which decides the resulting
/// state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Transient connectivity loss (disconnect, timeout, reset).
    #[error("feed connectivity failure: {0}")]
    Connectivity(String),

    /// Authentication/authorization rejected by the venue. Unrecoverable
    /// for the session.
    #[error("feed authentication failure: {0}")]
    Auth(String),

    /// The observer's ingestion queue is gone; the session is over.
    #[error("observer queue closed")]
    ObserverGone,
}

impl FeedError {
    /// Whether this failure halts the session (vs. degrading it).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Journal failures. Append and sync failures are fatal to the session:
/// an unjournaled state change would break replay determinism, so the
/// observer prefers halting to operating with a gap in its record.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Appending an entry to the durable log failed.
    #[error("journal append failed: {0}")]
    Append(#[source] std::io::Error),

    /// Forcing durability (fsync) failed.
    #[error("journal sync failed: {0}")]
    Sync(#[source] std::io::Error),

    /// Reading the log back failed.
    #[error("journal read failed: {0}")]
    Read(#[source] std::io::Error),

    /// An entry could not be serialized for appending.
    #[error("journal entry encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A complete entry line could not be decoded.
    #[error("journal entry decode failed at offset {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },
}
