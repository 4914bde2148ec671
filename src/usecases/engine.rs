//! Observer State Machine - Single-Consumer Decision Loop
//!
//! Owns all mutable observer state (current `SystemState`, continuity
//! trackers) and is the only writer to it: feeds, the heartbeat
//! monitor, and the shutdown path all communicate by posting events
//! into one bounded queue, so the hot path needs no locks.
//!
//! The ordering contract: a packet is journaled before any business
//! logic runs on it, and a transition's `STATUS_CHANGE` entry is
//! durably appended before the transition is committed or published.
//! If the journal itself fails, the session halts — the observer
//! prefers stopping to operating with a gap in its forensic record.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::metrics::ObserverMetrics;
use crate::domain::clock::{Clock, DriftWindow};
use crate::domain::errors::ClockError;
use crate::domain::packet::Packet;
use crate::domain::policy::{ContinuityTracker, FusePolicy, PendingTransition};
use crate::domain::state::{ShutdownMode, StateSnapshot, SystemState, TransitionReason};
use crate::ports::feed::{FeedEvent, FeedHandle, ObserverEvent};
use crate::ports::journal::{Journal, JournalEntry};

/// Cloneable handle for everything outside the decision loop.
///
/// Readers get snapshots; the heartbeat monitor and the shutdown path
/// post their events through here. Nothing external can mutate engine
/// state directly.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    events_tx: mpsc::Sender<ObserverEvent>,
    snapshot_rx: watch::Receiver<StateSnapshot>,
}

impl EngineHandle {
    /// Handle for feed adapters (restricted to feed events).
    #[must_use]
    pub fn feed_handle(&self) -> FeedHandle {
        FeedHandle::new(self.events_tx.clone())
    }

    /// Current snapshot of observer state.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Post a periodic staleness check. Returns false if the engine is
    /// gone.
    pub async fn stale_check(&self, now_us: u64) -> bool {
        self.events_tx
            .send(ObserverEvent::StaleCheck { now_us })
            .await
            .is_ok()
    }

    /// Request shutdown. Returns false if the engine is gone.
    pub async fn shutdown(&self, mode: ShutdownMode) -> bool {
        self.events_tx
            .send(ObserverEvent::Shutdown { mode })
            .await
            .is_ok()
    }
}

/// Samples kept for the rolling drift mean/slope gauges.
const DRIFT_WINDOW_SAMPLES: usize = 64;

/// The observer state machine.
///
/// Constructed with a calibrated clock (enforced: `CONNECTED` can never
/// precede calibration), then driven by `run` until shutdown or a fatal
/// journal failure.
pub struct ObserverEngine<J: Journal> {
    journal: Arc<J>,
    clock: Clock,
    tracker: ContinuityTracker,
    drift_window: DriftWindow,
    session_id: Option<Uuid>,
    packets_processed: u64,
    metrics: Arc<ObserverMetrics>,
    snapshot_tx: watch::Sender<StateSnapshot>,
    events_rx: mpsc::Receiver<ObserverEvent>,
}

impl<J: Journal> ObserverEngine<J> {
    /// Create an engine and its external handle.
    ///
    /// # Errors
    /// `ClockError::CalibrationNotReady` if the clock has not been
    /// calibrated — drift evaluation would be meaningless.
    pub fn new(
        journal: Arc<J>,
        clock: Clock,
        policy: FusePolicy,
        queue_capacity: usize,
        metrics: Arc<ObserverMetrics>,
    ) -> Result<(Self, EngineHandle), ClockError> {
        clock.calibration()?;

        let now_us = Clock::now_monotonic_us();
        let (events_tx, events_rx) = mpsc::channel(queue_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::initial(now_us));

        metrics.set_state(SystemState::Degraded);

        let engine = Self {
            journal,
            clock,
            tracker: ContinuityTracker::new(policy, now_us),
            drift_window: DriftWindow::new(DRIFT_WINDOW_SAMPLES),
            session_id: None,
            packets_processed: 0,
            metrics,
            snapshot_tx,
            events_rx,
        };
        let handle = EngineHandle {
            events_tx,
            snapshot_rx,
        };
        Ok((engine, handle))
    }

    /// Run the decision loop until shutdown.
    ///
    /// Returns an error only on a fatal journal failure; the halt has
    /// already been recorded (best effort) by then.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!("Observer engine started");

        let mut shut_down = false;
        while let Some(event) = self.events_rx.recv().await {
            if let ObserverEvent::Shutdown { mode } = event {
                info!(mode = %mode, "Shutdown requested");
                if mode == ShutdownMode::Drain {
                    // Already-accepted items are processed and journaled
                    // before the halt entry is written.
                    while let Ok(queued) = self.events_rx.try_recv() {
                        if matches!(queued, ObserverEvent::Shutdown { .. }) {
                            continue;
                        }
                        self.handle_event(queued).await?;
                    }
                }
                let pending = self.tracker.shutdown_transition(mode);
                self.commit(pending).await?;
                shut_down = true;
                break;
            }
            self.handle_event(event).await?;
        }

        if !shut_down {
            // All senders dropped without an explicit shutdown event.
            // Journal the stop anyway so replay never infers one.
            warn!("Event queue closed without shutdown request");
            let pending = self.tracker.shutdown_transition(ShutdownMode::Immediate);
            self.commit(pending).await?;
        }

        info!(
            packets = self.packets_processed,
            state = %self.tracker.state(),
            "Observer engine stopped"
        );
        Ok(())
    }

    async fn handle_event(&mut self, event: ObserverEvent) -> Result<()> {
        match event {
            ObserverEvent::Feed(FeedEvent::SessionStart {
                session_id,
                started_ts_us,
            }) => {
                let pending = self.tracker.observe_session_start(started_ts_us);
                match &pending {
                    Some(_) => {
                        info!(session_id = %session_id, "Session started");
                        self.session_id = Some(session_id);
                    }
                    None if !self.tracker.state().is_terminal() => {
                        warn!(
                            session_id = %session_id,
                            "Session start while already connected — ignored"
                        );
                    }
                    None => {}
                }
                self.commit(pending).await
            }
            ObserverEvent::Feed(FeedEvent::Packet(packet)) => self.on_packet(packet).await,
            ObserverEvent::Feed(FeedEvent::Heartbeat { ts_us }) => {
                self.tracker.observe_heartbeat(ts_us);
                self.publish();
                Ok(())
            }
            ObserverEvent::Feed(FeedEvent::Fault(fault)) => {
                warn!(error = %fault, fatal = fault.is_fatal(), "Adapter fault surfaced");
                let pending = self.tracker.observe_fault(&fault);
                self.commit(pending).await
            }
            ObserverEvent::StaleCheck { now_us } => {
                self.metrics.heartbeat_checks.inc();
                let pending = self.tracker.observe_stale_check(now_us);
                self.commit(pending).await
            }
            // Handled in `run`; a nested shutdown during drain is skipped
            // there too.
            ObserverEvent::Shutdown { .. } => Ok(()),
        }
    }

    /// Process one packet: journal first, then evaluate.
    async fn on_packet(&mut self, packet: Packet) -> Result<()> {
        let entry = JournalEntry::packet(Clock::now_monotonic_us(), packet.clone());
        let append_started_us = Clock::now_monotonic_us();
        if let Err(e) = self.journal.append(&entry).await {
            return self.halt_on_journal_failure(e.into()).await;
        }
        self.metrics
            .append_latency_us
            .observe((Clock::now_monotonic_us() - append_started_us) as f64);
        self.metrics
            .journal_appends
            .with_label_values(&["PACKET"])
            .inc();
        self.metrics
            .packets_ingested
            .with_label_values(&[packet.source.as_str()])
            .inc();
        self.packets_processed += 1;

        if self.tracker.state().is_terminal() {
            // Halted sessions keep the forensic record but decide nothing.
            self.publish();
            return Ok(());
        }

        let drift_us = self
            .clock
            .drift_us(packet.exchange_ts_us, packet.received_ts_us)?;
        self.metrics.last_drift_us.set(drift_us);
        self.drift_window.record(packet.received_ts_us, drift_us);
        if let Some(mean) = self.drift_window.mean_us() {
            self.metrics.drift_mean_us.set(mean);
        }
        if let Some(slope) = self.drift_window.slope_us_per_s() {
            self.metrics.drift_slope_us_per_s.set(slope);
        }

        let pending = self.tracker.observe_packet(&packet, drift_us);
        if let Some(transition) = &pending {
            match &transition.reason {
                TransitionReason::SequenceGapLoss { .. } => {
                    self.metrics.sequence_gaps.with_label_values(&["loss"]).inc();
                }
                TransitionReason::SequenceGapDuplicate { .. } => {
                    self.metrics
                        .sequence_gaps
                        .with_label_values(&["duplicate"])
                        .inc();
                }
                _ => {}
            }
        }
        self.commit(pending).await
    }

    /// Journal a proposed transition, then (and only then) commit and
    /// publish it.
    async fn commit(&mut self, pending: Option<PendingTransition>) -> Result<()> {
        let Some(transition) = pending else {
            self.publish();
            return Ok(());
        };

        let entry = JournalEntry::status_change(
            Clock::now_monotonic_us(),
            transition.from,
            transition.to,
            transition.reason.clone(),
        );
        if let Err(e) = self.journal.append(&entry).await {
            return self.halt_on_journal_failure(e.into()).await;
        }

        self.tracker.apply(&transition);
        self.metrics
            .journal_appends
            .with_label_values(&["STATUS_CHANGE"])
            .inc();
        self.metrics
            .status_changes
            .with_label_values(&[transition.to.to_string().as_str()])
            .inc();
        self.metrics.set_state(transition.to);

        info!(
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "State transition"
        );
        self.publish();
        Ok(())
    }

    /// The journal could not persist an entry: halt the session.
    ///
    /// The halt itself is journaled best-effort — the store may be
    /// entirely gone — and the engine reports the original failure.
    async fn halt_on_journal_failure(&mut self, err: anyhow::Error) -> Result<()> {
        error!(error = %err, "Journal write failed — halting session");
        if let Some(halt) = self.tracker.journal_failure_transition(err.to_string()) {
            let entry = JournalEntry::status_change(
                Clock::now_monotonic_us(),
                halt.from,
                halt.to,
                halt.reason.clone(),
            );
            if self.journal.append(&entry).await.is_err() {
                warn!("Could not journal the halt transition itself");
            }
            self.tracker.apply(&halt);
            self.metrics.set_state(SystemState::Halted);
            self.publish();
        }
        Err(err)
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(StateSnapshot {
            state: self.tracker.state(),
            session_id: self.session_id,
            last_sequence_id: self.tracker.last_sequence_id(),
            last_heartbeat_ts_us: self.tracker.last_heartbeat_ts_us(),
            packets_processed: self.packets_processed,
            updated_ts_us: Clock::now_monotonic_us(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ClockCalibration;

    #[test]
    fn engine_requires_calibrated_clock() {
        let metrics = Arc::new(ObserverMetrics::new().unwrap());
        let journal = Arc::new(NullJournal);
        let result = ObserverEngine::new(
            journal,
            Clock::new(),
            FusePolicy::default(),
            16,
            metrics,
        );
        assert!(matches!(result, Err(ClockError::CalibrationNotReady)));
    }

    #[test]
    fn calibrated_clock_is_accepted() {
        let metrics = Arc::new(ObserverMetrics::new().unwrap());
        let journal = Arc::new(NullJournal);
        let clock = Clock::with_calibration(ClockCalibration { epoch_offset_us: 0 });
        let (_, handle) =
            ObserverEngine::new(journal, clock, FusePolicy::default(), 16, metrics).unwrap();
        assert_eq!(handle.snapshot().state, SystemState::Degraded);
    }

    struct NullJournal;

    #[async_trait::async_trait]
    impl Journal for NullJournal {
        async fn append(
            &self,
            _entry: &JournalEntry,
        ) -> Result<u64, crate::domain::errors::JournalError> {
            Ok(0)
        }

        async fn sync(&self) -> Result<(), crate::domain::errors::JournalError> {
            Ok(())
        }

        async fn open_cursor(
            &self,
            _offset: u64,
        ) -> Result<
            Box<dyn crate::ports::journal::JournalCursor>,
            crate::domain::errors::JournalError,
        > {
            unimplemented!("null journal has no cursor")
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }
}
