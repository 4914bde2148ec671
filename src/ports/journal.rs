//! Journal Port - Append-only Durable Log Interface
//!
//! The journal is the observer's forensic record: every packet and
//! every state decision, totally ordered by append order. Entries are
//! self-describing (kind tag + versioned payload) so the log stays
//! readable across schema evolution, and readers always see a
//! consistent prefix while the writer keeps appending.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::JournalError;
use crate::domain::packet::Packet;
use crate::domain::state::{SystemState, TransitionReason};

/// Current encoding version stamped into every entry.
pub const ENTRY_VERSION: u16 = 1;

/// How hard the journal pushes entries to stable storage.
///
/// Part of the journal contract: `append` may suspend until
/// fsync-equivalent durability depending on this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    /// fsync after every append. Safest, slowest.
    SyncPerEntry,
    /// fsync every N appends. `STATUS_CHANGE` entries are always
    /// fsynced regardless — a transition must be durable before it
    /// takes effect.
    Batched,
}

/// One record in the append-only journal.
///
/// Exactly two kinds exist: the packets the observer saw, and the state
/// transitions it performed. Every transition produces exactly one
/// `STATUS_CHANGE` entry, appended before the transition takes effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalEntry {
    /// A packet, journaled before any business logic ran on it.
    Packet {
        version: u16,
        /// Monotonic time of the append.
        local_ts_us: u64,
        packet: Packet,
    },
    /// A state transition with its persisted reason.
    StatusChange {
        version: u16,
        /// Monotonic time of the append.
        local_ts_us: u64,
        from: SystemState,
        to: SystemState,
        reason: TransitionReason,
        /// Human-readable rendering of `reason`, for operators reading
        /// the raw log.
        detail: String,
    },
}

impl JournalEntry {
    /// Build a `PACKET` entry.
    #[must_use]
    pub fn packet(local_ts_us: u64, packet: Packet) -> Self {
        Self::Packet {
            version: ENTRY_VERSION,
            local_ts_us,
            packet,
        }
    }

    /// Build a `STATUS_CHANGE` entry. The human-readable detail string
    /// is derived from the typed reason so the two can never disagree.
    #[must_use]
    pub fn status_change(
        local_ts_us: u64,
        from: SystemState,
        to: SystemState,
        reason: TransitionReason,
    ) -> Self {
        let detail = reason.to_string();
        Self::StatusChange {
            version: ENTRY_VERSION,
            local_ts_us,
            from,
            to,
            reason,
            detail,
        }
    }

    /// Monotonic append timestamp of the entry.
    #[must_use]
    pub fn local_ts_us(&self) -> u64 {
        match self {
            Self::Packet { local_ts_us, .. } | Self::StatusChange { local_ts_us, .. } => {
                *local_ts_us
            }
        }
    }

    /// Entry kind as the journal's tag string.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Packet { .. } => "PACKET",
            Self::StatusChange { .. } => "STATUS_CHANGE",
        }
    }
}

/// An entry read back from the journal, with the offset it starts at.
/// The offset can be fed back to `Journal::open_cursor` to resume.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedEntry {
    pub offset: u64,
    pub entry: JournalEntry,
}

/// Lazy, finite, restartable sequence of journal entries.
#[async_trait]
pub trait JournalCursor: Send {
    /// Next entry, or `None` at the current end of the log. A torn
    /// final write is treated as end-of-log, never as an error.
    async fn next_entry(&mut self) -> Result<Option<SealedEntry>, JournalError>;
}

/// Append-only durable log.
///
/// Appends are totally ordered; the returned offset identifies the
/// entry for later replay. Depending on the configured durability
/// level, `append` may suspend until the entry is fsynced.
#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Append one entry, returning its durable offset.
    async fn append(&self, entry: &JournalEntry) -> Result<u64, JournalError>;

    /// Force durability of all appended entries.
    async fn sync(&self) -> Result<(), JournalError>;

    /// Open a read cursor starting at `offset` (0 = beginning).
    /// Safe to use concurrently with an active writer.
    async fn open_cursor(&self, offset: u64) -> Result<Box<dyn JournalCursor>, JournalError>;

    /// Whether the underlying store is usable (disk, permissions).
    async fn is_healthy(&self) -> bool;
}
