//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (file I/O, HTTP). Each sub-module groups
//! adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: Packet sources (capture replay; venue adapters plug in
//!   through the same port from outside the crate)
//! - `journal`: JSONL append-only log and session metadata store
//! - `metrics`: Prometheus metrics export and health/state endpoints

pub mod feeds;
pub mod journal;
pub mod metrics;
