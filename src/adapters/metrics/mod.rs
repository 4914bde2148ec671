//! Metrics Adapters - Observability Endpoints
//!
//! Prometheus metrics registry plus the read-only HTTP surface for
//! downstream consumers: liveness/readiness probes and the current
//! state snapshot. Nothing here can mutate observer state.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::ObserverMetrics;
