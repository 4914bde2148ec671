//! System State and Transition Reasons
//!
//! The three observer states and the typed reason attached to every
//! journaled transition. Reasons render to stable snake_case strings —
//! that rendering is what lands in the journal's human-readable field
//! and what the replay engine compares against.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health state of the observed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    /// Stream is live, monotonic, and within drift tolerance.
    Connected,
    /// Something is off but recoverable: duplicate delivery, transient
    /// disconnect, staleness. Recovery requires explicit confirmation.
    Degraded,
    /// Terminal for the session. Requires an external restart.
    Halted,
}

impl SystemState {
    /// `HALTED` admits no further transitions within the session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Halted)
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "CONNECTED"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// How the process stops when asked to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Process and journal already-accepted queue items, then stop.
    Drain,
    /// Stop without draining. Still journaled, so replay never has to
    /// infer an implicit stop.
    Immediate,
}

impl std::fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drain => write!(f, "drain"),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

/// Why a state transition happened. Persisted inside every
/// `STATUS_CHANGE` journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TransitionReason {
    /// Adapter reported a successful session start.
    SessionStart,
    /// `|drift|` exceeded the configured threshold.
    UnsafeDrift { drift_us: i64 },
    /// Sequence jumped forward: messages were lost.
    SequenceGapLoss { expected: u64, got: u64 },
    /// Sequence repeated or went backwards: duplicate/out-of-order
    /// delivery.
    SequenceGapDuplicate { expected: u64, got: u64 },
    /// Required number of consecutive clean packets observed while
    /// degraded.
    Recovered { clean_packets: u32 },
    /// No packet or heartbeat within the liveness timeout.
    StaleConnection { silent_for_us: u64, strikes: u32 },
    /// Adapter lost connectivity.
    AdapterConnectivity { detail: String },
    /// Venue rejected our credentials.
    AdapterAuth { detail: String },
    /// The journal itself could not persist an entry.
    JournalWriteFailure { detail: String },
    /// Operator-requested stop.
    Shutdown { mode: ShutdownMode },
}

impl TransitionReason {
    /// Whether the transition is derivable from the packet stream alone.
    ///
    /// Packet-caused transitions are recomputed during replay; the rest
    /// are external inputs that replay applies from the record.
    #[must_use]
    pub fn is_packet_caused(&self) -> bool {
        matches!(
            self,
            Self::UnsafeDrift { .. }
                | Self::SequenceGapLoss { .. }
                | Self::SequenceGapDuplicate { .. }
                | Self::Recovered { .. }
        )
    }
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionStart => write!(f, "session_start"),
            Self::UnsafeDrift { drift_us } => {
                write!(f, "unsafe_drift (drift_us={drift_us})")
            }
            Self::SequenceGapLoss { expected, got } => {
                write!(f, "sequence_gap_loss (expected={expected}, got={got})")
            }
            Self::SequenceGapDuplicate { expected, got } => {
                write!(f, "sequence_gap_duplicate (expected={expected}, got={got})")
            }
            Self::Recovered { clean_packets } => {
                write!(f, "recovered (clean_packets={clean_packets})")
            }
            Self::StaleConnection {
                silent_for_us,
                strikes,
            } => {
                write!(
                    f,
                    "stale_connection (silent_for_us={silent_for_us}, strikes={strikes})"
                )
            }
            Self::AdapterConnectivity { detail } => {
                write!(f, "adapter_connectivity ({detail})")
            }
            Self::AdapterAuth { detail } => write!(f, "adapter_auth ({detail})"),
            Self::JournalWriteFailure { detail } => {
                write!(f, "journal_write_failure ({detail})")
            }
            Self::Shutdown { mode } => write!(f, "shutdown (mode={mode})"),
        }
    }
}

/// Immutable read-model of the observer, published on a watch channel.
///
/// Downstream consumers (health server, tests) read this; they can
/// never mutate observer state through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current state.
    pub state: SystemState,
    /// Active session, if one has started.
    pub session_id: Option<Uuid>,
    /// Last accepted sequence id within the session.
    pub last_sequence_id: Option<u64>,
    /// Monotonic timestamp of the last liveness evidence.
    pub last_heartbeat_ts_us: u64,
    /// Packets journaled so far this process.
    pub packets_processed: u64,
    /// Monotonic timestamp of this snapshot.
    pub updated_ts_us: u64,
}

impl StateSnapshot {
    /// Snapshot for a freshly created engine: no session yet.
    #[must_use]
    pub fn initial(now_us: u64) -> Self {
        Self {
            state: SystemState::Degraded,
            session_id: None,
            last_sequence_id: None,
            last_heartbeat_ts_us: now_us,
            packets_processed: 0,
            updated_ts_us: now_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_is_terminal() {
        assert!(SystemState::Halted.is_terminal());
        assert!(!SystemState::Connected.is_terminal());
        assert!(!SystemState::Degraded.is_terminal());
    }

    #[test]
    fn reasons_render_stable_prefixes() {
        let r = TransitionReason::UnsafeDrift { drift_us: 600_000 };
        assert!(r.to_string().starts_with("unsafe_drift"));

        let r = TransitionReason::SequenceGapLoss {
            expected: 6,
            got: 7,
        };
        assert_eq!(r.to_string(), "sequence_gap_loss (expected=6, got=7)");
    }

    #[test]
    fn packet_caused_classification() {
        assert!(TransitionReason::Recovered { clean_packets: 3 }.is_packet_caused());
        assert!(!TransitionReason::Shutdown {
            mode: ShutdownMode::Drain
        }
        .is_packet_caused());
        assert!(!TransitionReason::SessionStart.is_packet_caused());
    }

    #[test]
    fn system_state_serializes_screaming() {
        let json = serde_json::to_string(&SystemState::Halted).unwrap();
        assert_eq!(json, "\"HALTED\"");
    }
}
