//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `feed`: Packet ingestion from venue adapters
//! - `journal`: Append-only durable log with sequential replay

pub mod feed;
pub mod journal;
