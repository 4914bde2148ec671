//! Journal Adapters - Append-only File Storage
//!
//! Implements the Journal port with newline-delimited JSON files and
//! an atomic JSON store for session metadata. No database dependency —
//! lightweight, streamable, and crash-recoverable.

pub mod jsonl;
pub mod meta;

pub use jsonl::JsonlJournal;
pub use meta::{MetaStore, SessionMeta};
