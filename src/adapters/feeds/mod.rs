//! Feed Adapters - Packet Sources
//!
//! Venue-specific wire protocols live outside this crate; adapters here
//! are venue-agnostic. `CaptureFeed` replays a recorded packet capture
//! file as a live session and is the crate's reference implementation
//! of the feed port contract.

pub mod capture;

pub use capture::CaptureFeed;
