//! Journal Replay Tool
//!
//! Re-runs the decision kernel over a recorded data directory and
//! verifies every journaled state transition. Usage:
//!
//! ```text
//! replay <data_dir>
//! ```
//!
//! Exit code 0 on PASS, 1 on divergence or a read error.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::info;

use market_observer::adapters::journal::{JsonlJournal, MetaStore};
use market_observer::ports::journal::DurabilityLevel;
use market_observer::usecases::{ReplayConfig, ReplayEngine};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(passed) => {
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("replay failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool> {
    let data_dir = std::env::args()
        .nth(1)
        .context("usage: replay <data_dir>")?;
    let data_dir = Path::new(&data_dir);

    let meta = MetaStore::new(data_dir)
        .await
        .context("Failed to open data directory")?
        .load()
        .await
        .context("Failed to load session metadata")?
        .context("No meta.json in data directory; nothing to replay")?;

    info!(
        session_id = %meta.session_id,
        epoch_offset_us = meta.calibration.epoch_offset_us,
        drift_threshold_us = meta.policy.drift_threshold_us,
        "Replaying recorded session"
    );

    let journal = JsonlJournal::open(
        data_dir.join(&meta.journal_file),
        DurabilityLevel::SyncPerEntry,
        1,
    )
    .await
    .context("Failed to open journal")?;

    let engine = ReplayEngine::new(ReplayConfig {
        calibration: meta.calibration,
        policy: meta.policy,
    });
    let verdict = engine.run(&journal).await;

    println!("{}", verdict.summary());
    Ok(verdict.passed())
}
