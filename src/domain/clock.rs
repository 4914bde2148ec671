//! Clock - Calibrated Time Source
//!
//! Bridges the two time bases the observer deals with: the local
//! monotonic clock (ordering, liveness) and the wall clock (venue
//! timestamps are epoch-based). A one-shot calibration measures the
//! offset between them; afterwards `drift_us` is the only path from a
//! packet to a drift value, so mixed-base subtraction cannot happen.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::errors::ClockError;

/// Microseconds per second, for conversions at call sites.
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Process-wide monotonic anchor. All monotonic readings are measured
/// against the same `Instant` so they are comparable across tasks.
static ANCHOR: OnceLock<Instant> = OnceLock::new();

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// The measured difference between the epoch and monotonic time bases.
///
/// Established once at startup, immutable afterwards. Persisted in the
/// session metadata so a replay can convert timestamps identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockCalibration {
    /// `epoch_us - monotonic_us` at the calibration instant.
    pub epoch_offset_us: i64,
}

/// Convert a monotonic receipt timestamp into epoch space and subtract
/// it from the venue timestamp.
///
/// This free function is the single legal path to a drift value: it is
/// pure, requires an explicit calibration, and both operands end up in
/// epoch space before the subtraction.
#[must_use]
pub fn drift_us(
    exchange_ts_epoch_us: u64,
    received_ts_monotonic_us: u64,
    calibration: ClockCalibration,
) -> i64 {
    let received_epoch_us = received_ts_monotonic_us as i64 + calibration.epoch_offset_us;
    exchange_ts_epoch_us as i64 - received_epoch_us
}

/// Authoritative local clock with optional calibration state.
///
/// The static readings (`now_monotonic_us`, `now_epoch_us`) are always
/// available; drift computation requires a completed calibration and
/// fails with `ClockError::CalibrationNotReady` otherwise.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    calibration: Option<ClockCalibration>,
}

impl Clock {
    /// Create an uncalibrated clock.
    #[must_use]
    pub fn new() -> Self {
        Self { calibration: None }
    }

    /// Create a clock with a known calibration (tests, replay).
    #[must_use]
    pub fn with_calibration(calibration: ClockCalibration) -> Self {
        Self {
            calibration: Some(calibration),
        }
    }

    /// Current monotonic time in microseconds since the process anchor.
    #[must_use]
    pub fn now_monotonic_us() -> u64 {
        anchor().elapsed().as_micros() as u64
    }

    /// Current wall-clock time in microseconds since the Unix epoch.
    ///
    /// Used for calibration and human-readable metadata, never for
    /// ordering decisions.
    #[must_use]
    pub fn now_epoch_us() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }

    /// Measure the epoch/monotonic offset at a single reference instant.
    ///
    /// Called once at startup, before any drift computation is permitted.
    pub fn calibrate(&mut self) -> ClockCalibration {
        let monotonic_us = Self::now_monotonic_us();
        let epoch_us = Self::now_epoch_us();
        let calibration = ClockCalibration {
            epoch_offset_us: epoch_us as i64 - monotonic_us as i64,
        };
        self.calibration = Some(calibration);
        calibration
    }

    /// The completed calibration, or `CalibrationNotReady`.
    pub fn calibration(&self) -> Result<ClockCalibration, ClockError> {
        self.calibration.ok_or(ClockError::CalibrationNotReady)
    }

    /// Whether calibration has completed.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Drift of a packet's venue timestamp against its local receipt
    /// time, both converted into epoch space.
    ///
    /// # Errors
    /// `ClockError::CalibrationNotReady` if called before `calibrate`.
    pub fn drift_us(
        &self,
        exchange_ts_epoch_us: u64,
        received_ts_monotonic_us: u64,
    ) -> Result<i64, ClockError> {
        let calibration = self.calibration()?;
        Ok(drift_us(
            exchange_ts_epoch_us,
            received_ts_monotonic_us,
            calibration,
        ))
    }
}

/// Rolling window of recent drift samples.
///
/// Feeds the drift telemetry gauges: a windowed mean and a
/// first-to-last slope, so operators can see drift trending toward the
/// threshold before the fuse trips.
#[derive(Debug, Clone)]
pub struct DriftWindow {
    capacity: usize,
    samples: VecDeque<(u64, i64)>,
}

impl DriftWindow {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Record one sample: the packet's monotonic receipt time and its
    /// computed drift.
    pub fn record(&mut self, received_ts_us: u64, drift_us: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((received_ts_us, drift_us));
    }

    /// Mean drift over the window, if any samples exist.
    #[must_use]
    pub fn mean_us(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|(_, drift)| drift).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    /// Drift trend across the window in microseconds per second.
    ///
    /// `None` until two samples with distinct receipt times exist.
    #[must_use]
    pub fn slope_us_per_s(&self) -> Option<f64> {
        let (first_ts, first_drift) = *self.samples.front()?;
        let (last_ts, last_drift) = *self.samples.back()?;
        if last_ts <= first_ts {
            return None;
        }
        let span_s = (last_ts - first_ts) as f64 / MICROS_PER_SECOND as f64;
        Some((last_drift - first_drift) as f64 / span_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_readings_advance() {
        let t1 = Clock::now_monotonic_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let t2 = Clock::now_monotonic_us();
        assert!(t2 > t1);
    }

    #[test]
    fn drift_before_calibration_fails() {
        let clock = Clock::new();
        let err = clock.drift_us(1_000_000, 500_000).unwrap_err();
        assert!(matches!(err, ClockError::CalibrationNotReady));
    }

    #[test]
    fn drift_after_calibration_is_numeric() {
        let mut clock = Clock::new();
        clock.calibrate();
        assert!(clock.drift_us(Clock::now_epoch_us(), Clock::now_monotonic_us()).is_ok());
    }

    #[test]
    fn drift_converts_bases_through_offset() {
        // Zero offset: monotonic readings are already in epoch space.
        let cal = ClockCalibration { epoch_offset_us: 0 };
        assert_eq!(drift_us(1_000_000_000_000, 1_000_000_100_000, cal), -100_000);

        // Non-zero offset shifts the receipt time before subtracting.
        let cal = ClockCalibration {
            epoch_offset_us: 1_000_000_000_000,
        };
        assert_eq!(drift_us(1_000_000_250_000, 100_000, cal), 150_000);
    }

    #[test]
    fn calibration_round_trips_through_accessor() {
        let mut clock = Clock::new();
        let cal = clock.calibrate();
        assert_eq!(clock.calibration().unwrap(), cal);
    }

    #[test]
    fn drift_window_is_empty_until_recorded() {
        let window = DriftWindow::new(8);
        assert_eq!(window.mean_us(), None);
        assert_eq!(window.slope_us_per_s(), None);
    }

    #[test]
    fn drift_window_tracks_mean_and_slope() {
        let mut window = DriftWindow::new(8);
        window.record(0, 100);
        window.record(500_000, 200);
        window.record(1_000_000, 300);

        assert_eq!(window.mean_us(), Some(200.0));
        // 200us of drift gained over one second of receipt time.
        assert_eq!(window.slope_us_per_s(), Some(200.0));
    }

    #[test]
    fn drift_window_evicts_oldest_samples() {
        let mut window = DriftWindow::new(2);
        window.record(0, 1_000_000);
        window.record(1_000_000, 100);
        window.record(2_000_000, 300);

        // The first sample fell out of the window.
        assert_eq!(window.mean_us(), Some(200.0));
        assert_eq!(window.slope_us_per_s(), Some(200.0));
    }

    #[test]
    fn drift_window_slope_needs_elapsed_time() {
        let mut window = DriftWindow::new(4);
        window.record(1_000, 50);
        assert_eq!(window.slope_us_per_s(), None);
        window.record(1_000, 80);
        assert_eq!(window.slope_us_per_s(), None);
    }
}
