//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! observer's workflows. Each use case is a self-contained operation.
//!
//! Use cases:
//! - `ObserverEngine`: the single-consumer state machine loop
//! - `HeartbeatMonitor`: periodic staleness checks feeding the engine
//! - `ReplayEngine`: deterministic journal replay and verification

pub mod engine;
pub mod heartbeat;
pub mod replay;

pub use engine::{EngineHandle, ObserverEngine};
pub use heartbeat::HeartbeatMonitor;
pub use replay::{ReplayConfig, ReplayEngine, ReplayVerdict, VerdictStatus};
