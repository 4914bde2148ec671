//! Health Check Server - Liveness, Readiness, and State Snapshot
//!
//! Exposes `/live`, `/ready`, `/state`, and `/metrics` via axum 0.7 for
//! Docker health checks and downstream consumers. Strictly read-only:
//! state arrives over a watch channel and can never be mutated here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use super::prometheus::ObserverMetrics;
use crate::domain::state::StateSnapshot;

/// Shared health flags polled by readiness probes.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the feed adapter considers its upstream healthy.
    pub feed_healthy: AtomicBool,
    /// Whether the journal store is usable.
    pub journal_healthy: AtomicBool,
}

impl HealthState {
    /// All healthy by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            feed_healthy: AtomicBool::new(true),
            journal_healthy: AtomicBool::new(true),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct AppState {
    health: Arc<HealthState>,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    metrics: Arc<ObserverMetrics>,
}

/// Axum-based health and state HTTP server.
pub struct HealthServer {
    health: Arc<HealthState>,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    metrics: Arc<ObserverMetrics>,
    port: u16,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub fn new(
        health: Arc<HealthState>,
        snapshot_rx: watch::Receiver<StateSnapshot>,
        metrics: Arc<ObserverMetrics>,
        port: u16,
    ) -> Self {
        Self {
            health,
            snapshot_rx,
            metrics,
            port,
        }
    }

    /// Serve until the shutdown broadcast fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let state = AppState {
            health: self.health,
            snapshot_rx: self.snapshot_rx,
            metrics: self.metrics,
        };

        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/state", get(Self::state_snapshot))
            .route("/metrics", get(Self::metrics_text))
            .with_state(state);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always 200 while the process runs.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness: healthy feed and journal, and the session not halted.
    async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
        let snapshot = state.snapshot_rx.borrow().clone();
        let ready = state.health.feed_healthy.load(Ordering::Relaxed)
            && state.health.journal_healthy.load(Ordering::Relaxed)
            && !snapshot.state.is_terminal();
        if ready {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    /// Current observer snapshot as JSON.
    async fn state_snapshot(State(state): State<AppState>) -> impl IntoResponse {
        let snapshot = state.snapshot_rx.borrow().clone();
        Json(snapshot)
    }

    /// Prometheus text exposition.
    async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
        state.metrics.render()
    }
}
