//! Session Metadata Store - Atomic JSON Snapshot
//!
//! Persists everything a replay needs to be configured identically to
//! the live run: session id, start time, clock calibration, and the
//! fuse policy in force. Written once at startup using atomic writes
//! (write to tmp file, then rename) so the file is always either the
//! old or the new version, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::clock::ClockCalibration;
use crate::domain::policy::FusePolicy;

/// Metadata format version.
pub const META_VERSION: u16 = 1;

/// Everything needed to replay a recorded session deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Format version.
    pub version: u16,
    /// Process-level session identifier.
    pub session_id: Uuid,
    /// Wall-clock start time, for humans reading the data directory.
    pub started_at: DateTime<Utc>,
    /// Epoch microseconds at startup.
    pub started_epoch_us: u64,
    /// The calibration measured at startup.
    pub calibration: ClockCalibration,
    /// The fuse policy the run was evaluated under.
    pub policy: FusePolicy,
    /// Journal file for this session, relative to the data directory.
    /// Stamped with the session id so a restart never appends a second
    /// session (with its own calibration) to an old journal.
    pub journal_file: String,
}

impl SessionMeta {
    /// Build metadata for a session starting now.
    #[must_use]
    pub fn new(
        session_id: Uuid,
        started_epoch_us: u64,
        calibration: ClockCalibration,
        policy: FusePolicy,
    ) -> Self {
        Self {
            version: META_VERSION,
            session_id,
            started_at: Utc::now(),
            started_epoch_us,
            calibration,
            policy,
            journal_file: format!("journal-{session_id}.jsonl"),
        }
    }
}

/// Atomic JSON store for `meta.json` in the data directory.
pub struct MetaStore {
    meta_path: PathBuf,
    tmp_path: PathBuf,
}

impl MetaStore {
    /// Create a store rooted at the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;
        Ok(Self {
            meta_path: dir.join("meta.json"),
            tmp_path: dir.join("meta.json.tmp"),
        })
    }

    /// Save session metadata atomically (tmp → rename).
    #[instrument(skip(self, meta), fields(session_id = %meta.session_id))]
    pub async fn save(&self, meta: &SessionMeta) -> Result<()> {
        let json =
            serde_json::to_string_pretty(meta).context("Failed to serialize session metadata")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp metadata file")?;
        fs::rename(&self.tmp_path, &self.meta_path)
            .await
            .context("Failed to rename metadata file")?;

        info!(path = %self.meta_path.display(), "Session metadata saved");
        Ok(())
    }

    /// Load the stored session metadata, or `None` if absent.
    pub async fn load(&self) -> Result<Option<SessionMeta>> {
        if !self.meta_path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.meta_path)
            .await
            .context("Failed to read metadata file")?;
        let meta = serde_json::from_str(&json).context("Failed to parse metadata JSON")?;
        Ok(Some(meta))
    }
}
