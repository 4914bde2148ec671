//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters, and
//! providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::ports::journal::DurabilityLevel;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
    let path = Path::new(path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: AppConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config.toml")?;

    validate_config(&config)?;

    info!(
        name = %config.observer.name,
        drift_threshold_us = config.fuses.drift_threshold_us,
        heartbeat_timeout_us = config.fuses.heartbeat_timeout_us,
        durability = ?config.journal.durability,
        "Configuration loaded successfully"
    );

    Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
    // Observer validation
    anyhow::ensure!(
        !config.observer.name.is_empty(),
        "observer.name must not be empty"
    );
    anyhow::ensure!(
        config.observer.queue_capacity > 0,
        "observer.queue_capacity must be positive"
    );
    anyhow::ensure!(
        config.observer.stale_check_interval_us > 0,
        "observer.stale_check_interval_us must be positive"
    );

    // Fuse validation
    anyhow::ensure!(
        config.fuses.drift_threshold_us > 0,
        "fuses.drift_threshold_us must be positive, got {}",
        config.fuses.drift_threshold_us
    );
    anyhow::ensure!(
        config.fuses.heartbeat_timeout_us > 0,
        "fuses.heartbeat_timeout_us must be positive"
    );
    anyhow::ensure!(
        config.fuses.max_stale_strikes > 0,
        "fuses.max_stale_strikes must be at least 1"
    );
    anyhow::ensure!(
        config.fuses.degraded_recovery_packets > 0,
        "fuses.degraded_recovery_packets must be at least 1"
    );
    anyhow::ensure!(
        config.observer.stale_check_interval_us <= config.fuses.heartbeat_timeout_us,
        "observer.stale_check_interval_us ({}) must not exceed fuses.heartbeat_timeout_us ({})",
        config.observer.stale_check_interval_us,
        config.fuses.heartbeat_timeout_us
    );

    // Journal validation
    anyhow::ensure!(
        !config.journal.data_dir.is_empty(),
        "journal.data_dir must not be empty"
    );
    if config.journal.durability == DurabilityLevel::Batched {
        anyhow::ensure!(
            config.journal.batch_max_pending > 0,
            "journal.batch_max_pending must be positive in batched mode"
        );
    }

    // Feed validation
    anyhow::ensure!(
        !config.feed.capture_path.is_empty(),
        "feed.capture_path must not be empty"
    );
    anyhow::ensure!(
        !config.feed.source.is_empty(),
        "feed.source must not be empty"
    );
    anyhow::ensure!(
        config.feed.heartbeat_interval_us > 0,
        "feed.heartbeat_interval_us must be positive"
    );

    // Metrics validation
    if config.metrics.enabled {
        anyhow::ensure!(config.metrics.port > 0, "metrics.port must be positive");
    }

    Ok(())
}
