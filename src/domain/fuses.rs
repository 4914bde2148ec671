//! Fuse Checks - Pure Safety Predicates
//!
//! Each fuse evaluates one invariant of a healthy stream and returns a
//! typed signal when it trips. Fuses never mutate state and never fail;
//! the state machine interprets the signals and decides transitions,
//! keeping policy separate from detection.

use serde::{Deserialize, Serialize};

/// Default drift threshold: 500ms expressed in microseconds.
pub const DEFAULT_DRIFT_THRESHOLD_US: i64 = 500_000;

/// Classification of a sequence discontinuity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Sequence jumped forward: messages were lost in transit.
    Loss,
    /// Sequence repeated or went backwards: duplicate or out-of-order
    /// delivery.
    Duplicate,
}

/// A tripped fuse. Absence of a signal means the check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuseSignal {
    /// Venue/local clock disagreement beyond tolerance.
    UnsafeDrift { drift_us: i64 },
    /// Sequence continuity broken within the session.
    SequenceGap {
        expected: u64,
        got: u64,
        kind: GapKind,
    },
    /// No packet and no adapter liveness signal within the timeout.
    StaleConnection { silent_for_us: u64 },
}

/// Drift fuse: trips when `|drift|` exceeds the threshold.
#[must_use]
pub fn drift_fuse(drift_us: i64, threshold_us: i64) -> Option<FuseSignal> {
    if drift_us.abs() > threshold_us {
        Some(FuseSignal::UnsafeDrift { drift_us })
    } else {
        None
    }
}

/// Sequence fuse: trips when the packet does not continue the session's
/// sequence exactly. The first packet of a session never trips.
#[must_use]
pub fn sequence_fuse(last_sequence_id: Option<u64>, got: u64) -> Option<FuseSignal> {
    let last = last_sequence_id?;
    let expected = last.saturating_add(1);
    if got == expected {
        return None;
    }
    let kind = if got > expected {
        GapKind::Loss
    } else {
        GapKind::Duplicate
    };
    Some(FuseSignal::SequenceGap {
        expected,
        got,
        kind,
    })
}

/// Heartbeat fuse: trips when the stream has been silent (no packet and
/// no adapter heartbeat) for longer than the timeout.
#[must_use]
pub fn heartbeat_fuse(
    last_heartbeat_ts_us: u64,
    now_monotonic_us: u64,
    timeout_us: u64,
) -> Option<FuseSignal> {
    let silent_for_us = now_monotonic_us.saturating_sub(last_heartbeat_ts_us);
    if silent_for_us > timeout_us {
        Some(FuseSignal::StaleConnection { silent_for_us })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_within_threshold_passes() {
        assert_eq!(drift_fuse(-100_000, DEFAULT_DRIFT_THRESHOLD_US), None);
        assert_eq!(drift_fuse(500_000, DEFAULT_DRIFT_THRESHOLD_US), None);
    }

    #[test]
    fn drift_beyond_threshold_trips_either_sign() {
        assert_eq!(
            drift_fuse(600_000, DEFAULT_DRIFT_THRESHOLD_US),
            Some(FuseSignal::UnsafeDrift { drift_us: 600_000 })
        );
        assert_eq!(
            drift_fuse(-600_000, DEFAULT_DRIFT_THRESHOLD_US),
            Some(FuseSignal::UnsafeDrift { drift_us: -600_000 })
        );
    }

    #[test]
    fn first_packet_never_trips_sequence() {
        assert_eq!(sequence_fuse(None, 42), None);
    }

    #[test]
    fn consecutive_sequence_passes() {
        assert_eq!(sequence_fuse(Some(5), 6), None);
    }

    #[test]
    fn skipped_sequence_is_loss() {
        assert_eq!(
            sequence_fuse(Some(5), 7),
            Some(FuseSignal::SequenceGap {
                expected: 6,
                got: 7,
                kind: GapKind::Loss
            })
        );
    }

    #[test]
    fn repeated_and_backward_sequences_are_duplicates() {
        assert_eq!(
            sequence_fuse(Some(5), 5),
            Some(FuseSignal::SequenceGap {
                expected: 6,
                got: 5,
                kind: GapKind::Duplicate
            })
        );
        assert_eq!(
            sequence_fuse(Some(5), 3),
            Some(FuseSignal::SequenceGap {
                expected: 6,
                got: 3,
                kind: GapKind::Duplicate
            })
        );
    }

    #[test]
    fn heartbeat_trips_only_past_timeout() {
        assert_eq!(heartbeat_fuse(1_000_000, 1_500_000, 5_000_000), None);
        assert_eq!(
            heartbeat_fuse(1_000_000, 7_000_001, 5_000_000),
            Some(FuseSignal::StaleConnection {
                silent_for_us: 6_000_001
            })
        );
    }

    #[test]
    fn heartbeat_tolerates_clock_equal_readings() {
        // now == last (same-instant readings) must not underflow.
        assert_eq!(heartbeat_fuse(1_000, 1_000, 0), None);
    }
}
