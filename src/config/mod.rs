//! Configuration Module - TOML-based Observer Configuration
//!
//! Loads and validates configuration from `config.toml`. All
//! thresholds and paths are externalized here — nothing is hardcoded
//! in the domain layer. The `[fuses]` section deserializes straight
//! into the domain `FusePolicy` so the live run and the persisted
//! session metadata can never disagree.

pub mod loader;

use serde::Deserialize;

use crate::domain::policy::FusePolicy;
use crate::domain::state::ShutdownMode;
use crate::ports::journal::DurabilityLevel;

/// Top-level observer configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the observer begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Process identity and queueing.
    pub observer: ObserverConfig,
    /// Fuse thresholds (drift, heartbeat, recovery window).
    #[serde(default)]
    pub fuses: FusePolicy,
    /// Journal storage and durability.
    pub journal: JournalConfig,
    /// Capture feed settings.
    pub feed: FeedConfig,
    /// Metrics and health endpoints.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserverConfig {
    /// Human-readable instance name.
    pub name: String,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Bounded ingestion queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Shutdown behavior: drain accepted items or stop immediately.
    #[serde(default = "default_shutdown_mode")]
    pub shutdown: ShutdownMode,
    /// Interval between periodic staleness checks (microseconds).
    #[serde(default = "default_stale_check_interval_us")]
    pub stale_check_interval_us: u64,
}

/// Journal storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// Directory holding `meta.json` and the per-session journal files.
    pub data_dir: String,
    /// Durability level for appends.
    #[serde(default = "default_durability")]
    pub durability: DurabilityLevel,
    /// Appends between fsyncs in batched mode.
    #[serde(default = "default_batch_max_pending")]
    pub batch_max_pending: u32,
}

/// Capture feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// JSONL capture file to replay.
    pub capture_path: String,
    /// Source label stamped into packets.
    #[serde(default = "default_source")]
    pub source: String,
    /// Delay between emitted packets (microseconds, 0 = unpaced).
    #[serde(default)]
    pub pace_us: u64,
    /// Synthetic heartbeat interval (microseconds).
    #[serde(default = "default_heartbeat_interval_us")]
    pub heartbeat_interval_us: u64,
}

/// Metrics and health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether to serve the HTTP endpoints at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Port for /live, /ready, /state, /metrics.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            port: default_metrics_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_shutdown_mode() -> ShutdownMode {
    ShutdownMode::Drain
}

fn default_stale_check_interval_us() -> u64 {
    1_000_000
}

fn default_durability() -> DurabilityLevel {
    DurabilityLevel::SyncPerEntry
}

fn default_batch_max_pending() -> u32 {
    64
}

fn default_source() -> String {
    "capture".to_string()
}

fn default_heartbeat_interval_us() -> u64 {
    1_000_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
