//! Domain layer - Core observer logic and models.
//!
//! This module contains the pure domain logic for the market observer.
//! No external dependencies allowed here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod clock;
pub mod errors;
pub mod fuses;
pub mod packet;
pub mod policy;
pub mod state;

// Re-export core types for convenience
pub use clock::{drift_us, Clock, ClockCalibration, DriftWindow};
pub use errors::{ClockError, FeedError, JournalError};
pub use fuses::{FuseSignal, GapKind};
pub use packet::Packet;
pub use policy::{ContinuityTracker, FusePolicy, PendingTransition};
pub use state::{ShutdownMode, StateSnapshot, SystemState, TransitionReason};
