//! Prometheus Metrics Registry - Observer Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers ingestion volume, journal durability latency, drift, gap
//! counts, and the current state machine position.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::domain::state::SystemState;

/// Centralized Prometheus metrics for the observer.
///
/// All metrics follow the naming convention `market_observer_*`.
pub struct ObserverMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Packets ingested, labelled by feed source.
    pub packets_ingested: IntCounterVec,
    /// Journal appends, labelled by entry kind.
    pub journal_appends: IntCounterVec,
    /// Journal append latency histogram (microseconds).
    pub append_latency_us: Histogram,
    /// Drift of the most recent packet (microseconds, signed).
    pub last_drift_us: IntGauge,
    /// Mean drift over the recent sample window (microseconds).
    pub drift_mean_us: Gauge,
    /// Drift trend over the recent sample window (microseconds/second).
    pub drift_slope_us_per_s: Gauge,
    /// Sequence gaps detected, labelled by kind (loss/duplicate).
    pub sequence_gaps: IntCounterVec,
    /// Periodic heartbeat checks performed.
    pub heartbeat_checks: IntCounter,
    /// State transitions journaled, labelled by target state.
    pub status_changes: IntCounterVec,
    /// Current state as a number (0=CONNECTED, 1=DEGRADED, 2=HALTED).
    pub system_state: IntGauge,
}

impl ObserverMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let packets_ingested = IntCounterVec::new(
            Opts::new(
                "market_observer_packets_ingested_total",
                "Packets ingested and journaled",
            ),
            &["source"],
        )?;

        let journal_appends = IntCounterVec::new(
            Opts::new(
                "market_observer_journal_appends_total",
                "Journal entries appended",
            ),
            &["kind"],
        )?;

        let append_latency_us = Histogram::with_opts(
            HistogramOpts::new(
                "market_observer_append_latency_us",
                "Journal append latency in microseconds",
            )
            .buckets(vec![50.0, 100.0, 500.0, 1000.0, 5000.0, 20000.0, 100_000.0]),
        )?;

        let last_drift_us = IntGauge::new(
            "market_observer_last_drift_us",
            "Drift of the most recent packet in microseconds",
        )?;

        let drift_mean_us = Gauge::new(
            "market_observer_drift_mean_us",
            "Mean drift over the recent sample window in microseconds",
        )?;

        let drift_slope_us_per_s = Gauge::new(
            "market_observer_drift_slope_us_per_s",
            "Drift trend over the recent sample window in microseconds per second",
        )?;

        let sequence_gaps = IntCounterVec::new(
            Opts::new(
                "market_observer_sequence_gaps_total",
                "Sequence continuity violations detected",
            ),
            &["kind"],
        )?;

        let heartbeat_checks = IntCounter::new(
            "market_observer_heartbeat_checks_total",
            "Periodic staleness checks performed",
        )?;

        let status_changes = IntCounterVec::new(
            Opts::new(
                "market_observer_status_changes_total",
                "State transitions journaled",
            ),
            &["to"],
        )?;

        let system_state = IntGauge::new(
            "market_observer_system_state",
            "Current state (0=CONNECTED, 1=DEGRADED, 2=HALTED)",
        )?;

        registry.register(Box::new(packets_ingested.clone()))?;
        registry.register(Box::new(journal_appends.clone()))?;
        registry.register(Box::new(append_latency_us.clone()))?;
        registry.register(Box::new(last_drift_us.clone()))?;
        registry.register(Box::new(drift_mean_us.clone()))?;
        registry.register(Box::new(drift_slope_us_per_s.clone()))?;
        registry.register(Box::new(sequence_gaps.clone()))?;
        registry.register(Box::new(heartbeat_checks.clone()))?;
        registry.register(Box::new(status_changes.clone()))?;
        registry.register(Box::new(system_state.clone()))?;

        Ok(Self {
            registry,
            packets_ingested,
            journal_appends,
            append_latency_us,
            last_drift_us,
            drift_mean_us,
            drift_slope_us_per_s,
            sequence_gaps,
            heartbeat_checks,
            status_changes,
            system_state,
        })
    }

    /// Record the current state machine position.
    pub fn set_state(&self, state: SystemState) {
        let value = match state {
            SystemState::Connected => 0,
            SystemState::Degraded => 1,
            SystemState::Halted => 2,
        };
        self.system_state.set(value);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
