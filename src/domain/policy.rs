//! Fuse Policy and Continuity Tracking
//!
//! The deterministic decision kernel of the observer. Both the live
//! engine and the replay engine drive the same `ContinuityTracker`, so
//! a replayed journal reproduces the live run's transitions by
//! construction rather than by careful duplication.
//!
//! A tracker observation proposes at most one `PendingTransition`; the
//! caller journals the corresponding STATUS_CHANGE entry and only then
//! commits it with `apply`. The tracker itself never performs a side
//! effect.

use serde::{Deserialize, Serialize};

use super::errors::FeedError;
use super::fuses::{self, FuseSignal, GapKind, DEFAULT_DRIFT_THRESHOLD_US};
use super::packet::Packet;
use super::state::{ShutdownMode, SystemState, TransitionReason};

/// Tunable fuse thresholds, loaded from `[fuses]` config and persisted
/// in session metadata for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusePolicy {
    /// Maximum tolerated `|drift|` in microseconds.
    #[serde(default = "default_drift_threshold_us")]
    pub drift_threshold_us: i64,
    /// Silence tolerated before the heartbeat fuse trips.
    #[serde(default = "default_heartbeat_timeout_us")]
    pub heartbeat_timeout_us: u64,
    /// Consecutive stale checks before a degraded session halts.
    #[serde(default = "default_max_stale_strikes")]
    pub max_stale_strikes: u32,
    /// Consecutive clean packets required to recover from DEGRADED.
    #[serde(default = "default_degraded_recovery_packets")]
    pub degraded_recovery_packets: u32,
}

fn default_drift_threshold_us() -> i64 {
    DEFAULT_DRIFT_THRESHOLD_US
}

fn default_heartbeat_timeout_us() -> u64 {
    5_000_000
}

fn default_max_stale_strikes() -> u32 {
    3
}

fn default_degraded_recovery_packets() -> u32 {
    3
}

impl Default for FusePolicy {
    fn default() -> Self {
        Self {
            drift_threshold_us: default_drift_threshold_us(),
            heartbeat_timeout_us: default_heartbeat_timeout_us(),
            max_stale_strikes: default_max_stale_strikes(),
            degraded_recovery_packets: default_degraded_recovery_packets(),
        }
    }
}

/// A proposed state transition, not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransition {
    pub from: SystemState,
    pub to: SystemState,
    pub reason: TransitionReason,
}

/// Owns the observer's continuity state: current `SystemState`, last
/// sequence id, last liveness evidence, stale-strike and recovery
/// counters.
///
/// Starts in `DEGRADED` — `CONNECTED` is only entered through an
/// explicit session start. Signal priority when multiple fuses fire on
/// one packet is fixed: unsafe drift, then loss gaps, then duplicate
/// gaps, then recovery. Exactly one transition per observation.
#[derive(Debug, Clone)]
pub struct ContinuityTracker {
    policy: FusePolicy,
    state: SystemState,
    last_sequence_id: Option<u64>,
    last_heartbeat_ts_us: u64,
    stale_strikes: u32,
    clean_streak: u32,
}

impl ContinuityTracker {
    /// Tracker for a fresh process, before any session has started.
    #[must_use]
    pub fn new(policy: FusePolicy, now_us: u64) -> Self {
        Self {
            policy,
            state: SystemState::Degraded,
            last_sequence_id: None,
            last_heartbeat_ts_us: now_us,
            stale_strikes: 0,
            clean_streak: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SystemState {
        self.state
    }

    #[must_use]
    pub fn last_sequence_id(&self) -> Option<u64> {
        self.last_sequence_id
    }

    #[must_use]
    pub fn last_heartbeat_ts_us(&self) -> u64 {
        self.last_heartbeat_ts_us
    }

    #[must_use]
    pub fn policy(&self) -> &FusePolicy {
        &self.policy
    }

    fn pending(&self, to: SystemState, reason: TransitionReason) -> Option<PendingTransition> {
        Some(PendingTransition {
            from: self.state,
            to,
            reason,
        })
    }

    /// Commit a previously proposed transition.
    ///
    /// Replay determinism invariant: `state`, `last_sequence_id`, and
    /// `clean_streak` change only here, in `observe_packet`, or in an
    /// `observe_session_start` that returned a transition — i.e. only
    /// on inputs the journal records.
    pub fn apply(&mut self, transition: &PendingTransition) {
        self.state = transition.to;
        self.clean_streak = 0;
    }

    /// A new session began: sequence tracking resets explicitly and the
    /// stream is considered live again.
    ///
    /// A session start while already `CONNECTED` is a boundary contract
    /// anomaly (the adapter must report the old session's fault first)
    /// and is ignored so continuity is never reset silently.
    pub fn observe_session_start(&mut self, now_us: u64) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }
        self.last_heartbeat_ts_us = self.last_heartbeat_ts_us.max(now_us);
        self.stale_strikes = 0;
        if self.state == SystemState::Connected {
            return None;
        }
        self.last_sequence_id = None;
        self.clean_streak = 0;
        self.pending(SystemState::Connected, TransitionReason::SessionStart)
    }

    /// Evaluate all packet fuses and update continuity trackers.
    ///
    /// `drift_us` must come from the calibrated conversion path.
    pub fn observe_packet(&mut self, packet: &Packet, drift_us: i64) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }

        let seq_signal = fuses::sequence_fuse(self.last_sequence_id, packet.sequence_id);
        let drift_signal = fuses::drift_fuse(drift_us, self.policy.drift_threshold_us);

        // Any packet is liveness evidence, even a bad one.
        self.last_sequence_id = Some(packet.sequence_id);
        self.last_heartbeat_ts_us = packet.received_ts_us;
        self.stale_strikes = 0;

        if let Some(FuseSignal::UnsafeDrift { drift_us }) = drift_signal {
            self.clean_streak = 0;
            return self.pending(
                SystemState::Halted,
                TransitionReason::UnsafeDrift { drift_us },
            );
        }

        if let Some(FuseSignal::SequenceGap {
            expected,
            got,
            kind,
        }) = seq_signal
        {
            self.clean_streak = 0;
            return match kind {
                GapKind::Loss => self.pending(
                    SystemState::Halted,
                    TransitionReason::SequenceGapLoss { expected, got },
                ),
                GapKind::Duplicate if self.state == SystemState::Degraded => None,
                GapKind::Duplicate => self.pending(
                    SystemState::Degraded,
                    TransitionReason::SequenceGapDuplicate { expected, got },
                ),
            };
        }

        // Clean packet: count toward recovery if we are degraded.
        if self.state == SystemState::Degraded {
            self.clean_streak += 1;
            if self.clean_streak >= self.policy.degraded_recovery_packets {
                let clean_packets = self.clean_streak;
                self.clean_streak = 0;
                return self.pending(
                    SystemState::Connected,
                    TransitionReason::Recovered { clean_packets },
                );
            }
        }

        None
    }

    /// Adapter liveness signal, independent of data packets.
    pub fn observe_heartbeat(&mut self, ts_us: u64) {
        self.last_heartbeat_ts_us = self.last_heartbeat_ts_us.max(ts_us);
        self.stale_strikes = 0;
    }

    /// Periodic staleness evaluation driven by the heartbeat monitor.
    pub fn observe_stale_check(&mut self, now_us: u64) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }
        match fuses::heartbeat_fuse(
            self.last_heartbeat_ts_us,
            now_us,
            self.policy.heartbeat_timeout_us,
        ) {
            None => {
                self.stale_strikes = 0;
                None
            }
            Some(FuseSignal::StaleConnection { silent_for_us }) => {
                self.stale_strikes += 1;
                let reason = TransitionReason::StaleConnection {
                    silent_for_us,
                    strikes: self.stale_strikes,
                };
                if self.stale_strikes >= self.policy.max_stale_strikes {
                    self.pending(SystemState::Halted, reason)
                } else if self.state == SystemState::Degraded {
                    None
                } else {
                    self.pending(SystemState::Degraded, reason)
                }
            }
            Some(_) => None,
        }
    }

    /// Adapter-reported failure crossing the boundary.
    pub fn observe_fault(&mut self, error: &FeedError) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }
        match error {
            FeedError::Auth(detail) => self.pending(
                SystemState::Halted,
                TransitionReason::AdapterAuth {
                    detail: detail.clone(),
                },
            ),
            FeedError::Connectivity(detail) => {
                if self.state == SystemState::Degraded {
                    None
                } else {
                    self.pending(
                        SystemState::Degraded,
                        TransitionReason::AdapterConnectivity {
                            detail: detail.clone(),
                        },
                    )
                }
            }
            FeedError::ObserverGone => None,
        }
    }

    /// Operator-requested stop. Always halts unless already halted.
    #[must_use]
    pub fn shutdown_transition(&self, mode: ShutdownMode) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }
        self.pending(SystemState::Halted, TransitionReason::Shutdown { mode })
    }

    /// The journal itself failed: fatal to the session.
    #[must_use]
    pub fn journal_failure_transition(&self, detail: String) -> Option<PendingTransition> {
        if self.state.is_terminal() {
            return None;
        }
        self.pending(
            SystemState::Halted,
            TransitionReason::JournalWriteFailure { detail },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u64, received_ts_us: u64) -> Packet {
        Packet::new(seq, 0, received_ts_us, "test", "t", serde_json::Value::Null)
    }

    fn connected_tracker() -> ContinuityTracker {
        let mut t = ContinuityTracker::new(FusePolicy::default(), 0);
        let start = t.observe_session_start(0).unwrap();
        t.apply(&start);
        t
    }

    #[test]
    fn session_start_connects_from_degraded() {
        let mut t = ContinuityTracker::new(FusePolicy::default(), 0);
        assert_eq!(t.state(), SystemState::Degraded);
        let pending = t.observe_session_start(10).unwrap();
        assert_eq!(pending.from, SystemState::Degraded);
        assert_eq!(pending.to, SystemState::Connected);
        assert_eq!(pending.reason, TransitionReason::SessionStart);
    }

    #[test]
    fn clean_packets_keep_connected_and_track_sequence() {
        let mut t = connected_tracker();
        assert_eq!(t.observe_packet(&packet(1, 100), 0), None);
        assert_eq!(t.observe_packet(&packet(2, 200), -100_000), None);
        assert_eq!(t.last_sequence_id(), Some(2));
        assert_eq!(t.last_heartbeat_ts_us(), 200);
    }

    #[test]
    fn unsafe_drift_halts() {
        let mut t = connected_tracker();
        let pending = t.observe_packet(&packet(1, 100), 600_000).unwrap();
        assert_eq!(pending.to, SystemState::Halted);
        assert_eq!(
            pending.reason,
            TransitionReason::UnsafeDrift { drift_us: 600_000 }
        );
    }

    #[test]
    fn loss_gap_halts_with_expected_got() {
        let mut t = connected_tracker();
        assert!(t.observe_packet(&packet(5, 100), 0).is_none());
        let pending = t.observe_packet(&packet(7, 200), 0).unwrap();
        assert_eq!(pending.to, SystemState::Halted);
        assert_eq!(
            pending.reason,
            TransitionReason::SequenceGapLoss {
                expected: 6,
                got: 7
            }
        );
    }

    #[test]
    fn duplicate_degrades_then_recovers_after_streak() {
        let mut t = connected_tracker();
        assert!(t.observe_packet(&packet(5, 100), 0).is_none());

        let degrade = t.observe_packet(&packet(5, 200), 0).unwrap();
        assert_eq!(degrade.to, SystemState::Degraded);
        t.apply(&degrade);

        // Three consecutive clean packets (default recovery window).
        assert!(t.observe_packet(&packet(6, 300), 0).is_none());
        assert!(t.observe_packet(&packet(7, 400), 0).is_none());
        let recover = t.observe_packet(&packet(8, 500), 0).unwrap();
        assert_eq!(recover.to, SystemState::Connected);
        assert_eq!(
            recover.reason,
            TransitionReason::Recovered { clean_packets: 3 }
        );
    }

    #[test]
    fn dirty_packet_resets_recovery_streak() {
        let mut t = connected_tracker();
        assert!(t.observe_packet(&packet(5, 100), 0).is_none());
        let degrade = t.observe_packet(&packet(5, 200), 0).unwrap();
        t.apply(&degrade);

        assert!(t.observe_packet(&packet(6, 300), 0).is_none());
        // Duplicate mid-recovery: streak resets, still degraded.
        assert!(t.observe_packet(&packet(6, 400), 0).is_none());
        assert!(t.observe_packet(&packet(7, 500), 0).is_none());
        assert!(t.observe_packet(&packet(8, 600), 0).is_none());
        let recover = t.observe_packet(&packet(9, 700), 0).unwrap();
        assert_eq!(recover.to, SystemState::Connected);
    }

    #[test]
    fn drift_takes_priority_over_gap() {
        let mut t = connected_tracker();
        assert!(t.observe_packet(&packet(5, 100), 0).is_none());
        let pending = t.observe_packet(&packet(9, 200), 700_000).unwrap();
        assert!(matches!(
            pending.reason,
            TransitionReason::UnsafeDrift { .. }
        ));
    }

    #[test]
    fn stale_checks_degrade_then_halt() {
        let mut t = connected_tracker();
        let timeout = t.policy().heartbeat_timeout_us;

        let degrade = t.observe_stale_check(timeout + 1).unwrap();
        assert_eq!(degrade.to, SystemState::Degraded);
        t.apply(&degrade);

        assert!(t.observe_stale_check(timeout + 2).is_none());
        let halt = t.observe_stale_check(timeout + 3).unwrap();
        assert_eq!(halt.to, SystemState::Halted);
        assert!(matches!(
            halt.reason,
            TransitionReason::StaleConnection { strikes: 3, .. }
        ));
    }

    #[test]
    fn session_start_while_connected_is_ignored() {
        let mut t = connected_tracker();
        assert!(t.observe_packet(&packet(5, 100), 0).is_none());
        // Continuity must not reset silently.
        assert!(t.observe_session_start(200).is_none());
        assert_eq!(t.last_sequence_id(), Some(5));
    }

    #[test]
    fn heartbeat_resets_stale_strikes() {
        let mut t = connected_tracker();
        let timeout = t.policy().heartbeat_timeout_us;

        let degrade = t.observe_stale_check(timeout + 1).unwrap();
        t.apply(&degrade);
        t.observe_heartbeat(timeout + 2);
        // Fresh heartbeat: next check within timeout passes.
        assert!(t.observe_stale_check(timeout + 3).is_none());
    }

    #[test]
    fn auth_fault_halts_connectivity_degrades() {
        let mut t = connected_tracker();
        let degrade = t
            .observe_fault(&FeedError::Connectivity("reset by peer".into()))
            .unwrap();
        assert_eq!(degrade.to, SystemState::Degraded);
        t.apply(&degrade);

        let halt = t
            .observe_fault(&FeedError::Auth("bad api key".into()))
            .unwrap();
        assert_eq!(halt.to, SystemState::Halted);
    }

    #[test]
    fn halted_is_inert() {
        let mut t = connected_tracker();
        let halt = t.observe_packet(&packet(1, 100), 900_000).unwrap();
        t.apply(&halt);

        assert!(t.observe_packet(&packet(2, 200), 0).is_none());
        assert!(t.observe_session_start(300).is_none());
        assert!(t.observe_stale_check(u64::MAX).is_none());
        assert!(t.shutdown_transition(ShutdownMode::Drain).is_none());
    }
}
