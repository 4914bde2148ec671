//! Market Observer — Entry Point
//!
//! Initializes configuration, logging, the calibrated clock, the
//! journal, and the observer engine. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Calibrate the clock (epoch/monotonic offset, once)
//! 4. Persist session metadata (calibration + fuse policy for replay)
//! 5. Open the append-only JSONL journal
//! 6. Create metrics registry + engine (single-consumer state machine)
//! 7. Spawn health/metrics server (/live /ready /state /metrics)
//! 8. Spawn heartbeat monitor (periodic staleness checks)
//! 9. Spawn capture feed (session start, packets, heartbeats)
//! 10. Wait for SIGINT → journaled shutdown (drain or immediate)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use market_observer::adapters::feeds::CaptureFeed;
use market_observer::adapters::journal::{JsonlJournal, MetaStore, SessionMeta};
use market_observer::adapters::metrics::{HealthServer, HealthState, ObserverMetrics};
use market_observer::config;
use market_observer::domain::clock::Clock;
use market_observer::ports::feed::PacketFeed;
use market_observer::ports::journal::Journal;
use market_observer::usecases::{HeartbeatMonitor, ObserverEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config =
        config::loader::load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.observer.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.observer.name,
        version = env!("CARGO_PKG_VERSION"),
        shutdown = %config.observer.shutdown,
        "Starting market observer"
    );

    // ── 3. Calibrate the clock ──────────────────────────────
    let mut clock = Clock::new();
    let calibration = clock.calibrate();
    info!(
        epoch_offset_us = calibration.epoch_offset_us,
        "Clock calibrated"
    );

    // ── 4. Persist session metadata for replay ──────────────
    let session_id = Uuid::new_v4();
    let meta = SessionMeta::new(session_id, Clock::now_epoch_us(), calibration, config.fuses);
    let meta_store = MetaStore::new(&config.journal.data_dir)
        .await
        .context("Failed to prepare session metadata store")?;
    meta_store
        .save(&meta)
        .await
        .context("Failed to persist session metadata")?;

    // ── 5. Open this session's append-only journal ──────────
    // Rolled per session: a restart must never append a second session
    // (with its own calibration) to an old journal.
    let journal_path = std::path::Path::new(&config.journal.data_dir).join(&meta.journal_file);
    let journal = Arc::new(
        JsonlJournal::open(
            &journal_path,
            config.journal.durability,
            config.journal.batch_max_pending,
        )
        .await
        .context("Failed to open journal")?,
    );
    info!(path = %journal_path.display(), durability = ?config.journal.durability, "Journal open");

    // ── 6. Metrics registry + observer engine ───────────────
    let metrics = Arc::new(ObserverMetrics::new().context("Failed to register metrics")?);
    let (engine, handle) = ObserverEngine::new(
        Arc::clone(&journal),
        clock,
        config.fuses,
        config.observer.queue_capacity,
        Arc::clone(&metrics),
    )
    .context("Engine construction requires a calibrated clock")?;

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let health = Arc::new(HealthState::new());

    // ── 7. Spawn health/metrics server ──────────────────────
    let health_handle = if config.metrics.enabled {
        let server = HealthServer::new(
            Arc::clone(&health),
            handle.subscribe(),
            Arc::clone(&metrics),
            config.metrics.port,
        );
        let server_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    // ── 8. Spawn heartbeat monitor ──────────────────────────
    let monitor = HeartbeatMonitor::new(handle.clone(), config.observer.stale_check_interval_us);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    // ── 9. Spawn capture feed + health poller ───────────────
    let feed = Arc::new(CaptureFeed::new(&config.feed));
    let feed_shutdown = shutdown_tx.subscribe();
    let feed_ref = Arc::clone(&feed);
    let feed_handle_tx = handle.feed_handle();
    let feed_task = tokio::spawn(async move {
        if let Err(e) = feed_ref.run(feed_handle_tx, feed_shutdown).await {
            error!(error = %e, "Capture feed failed");
        }
    });

    let poller_handle = tokio::spawn(health_poller(
        Arc::clone(&feed),
        Arc::clone(&journal),
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    ));

    // ── 10. Run the engine until SIGINT or fatal failure ────
    let mut engine_task = tokio::spawn(engine.run());
    info!("All tasks spawned — observer is running");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!(mode = %config.observer.shutdown, "SIGINT received, initiating journaled shutdown");
            if !handle.shutdown(config.observer.shutdown).await {
                warn!("Engine already gone at shutdown");
            }
        }
        result = &mut engine_task => {
            // Fatal journal failure path: the halt is already journaled.
            error!("Engine stopped without a shutdown request");
            report_engine_exit(result.map_err(Into::into).and_then(|r| r));
            let _ = shutdown_tx.send(());
            let _ = tokio::time::timeout(Duration::from_secs(5), feed_task).await;
            monitor_handle.abort();
            poller_handle.abort();
            if let Some(h) = health_handle {
                h.abort();
            }
            std::process::exit(1);
        }
    }

    // Stop producers, then wait for the engine to drain and halt.
    let _ = shutdown_tx.send(());
    health.feed_healthy.store(false, Ordering::Relaxed);

    match tokio::time::timeout(Duration::from_secs(30), engine_task).await {
        Ok(result) => report_engine_exit(result.map_err(Into::into).and_then(|r| r)),
        Err(_) => error!("Engine did not stop within 30s"),
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), feed_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    poller_handle.abort();
    if let Some(h) = health_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), h).await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn report_engine_exit(result: Result<()>) {
    match result {
        Ok(()) => info!("Engine stopped cleanly"),
        Err(e) => error!(error = %e, "Engine stopped with error"),
    }
}

/// Periodically refresh the readiness flags from the adapters.
async fn health_poller(
    feed: Arc<CaptureFeed>,
    journal: Arc<JsonlJournal>,
    health: Arc<HealthState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                health
                    .feed_healthy
                    .store(feed.is_healthy().await, Ordering::Relaxed);
                health
                    .journal_healthy
                    .store(journal.is_healthy().await, Ordering::Relaxed);
            }
        }
    }
}
