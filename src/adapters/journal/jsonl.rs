//! JSONL Journal - Append-only Newline-delimited JSON Log
//!
//! Each line is one self-contained, kind-tagged entry. The format is
//! optimized for append-only writes, line-by-line streaming, and
//! recovery after a crash: a torn final line (no trailing newline) is
//! ignored by readers, so they always see a consistent prefix while
//! the writer keeps appending.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, SeekFrom};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::domain::errors::JournalError;
use crate::ports::journal::{
    DurabilityLevel, Journal, JournalCursor, JournalEntry, SealedEntry,
};

struct Writer {
    file: File,
    /// Byte offset where the next entry will start.
    offset: u64,
    /// Appends since the last fsync (batched mode).
    pending: u32,
}

/// Append-only JSONL journal with configurable durability.
pub struct JsonlJournal {
    path: PathBuf,
    durability: DurabilityLevel,
    batch_max_pending: u32,
    writer: Mutex<Writer>,
}

impl JsonlJournal {
    /// Open (or create) the journal file, appending to existing content.
    pub async fn open(
        path: impl AsRef<Path>,
        durability: DurabilityLevel,
        batch_max_pending: u32,
    ) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(JournalError::Append)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(JournalError::Append)?;
        let offset = file.metadata().await.map_err(JournalError::Append)?.len();

        info!(
            path = %path.display(),
            existing_bytes = offset,
            durability = ?durability,
            "Journal opened"
        );

        Ok(Self {
            path,
            durability,
            batch_max_pending: batch_max_pending.max(1),
            writer: Mutex::new(Writer {
                file,
                offset,
                pending: 0,
            }),
        })
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Journal for JsonlJournal {
    #[instrument(skip(self, entry), fields(kind = entry.kind()))]
    async fn append(&self, entry: &JournalEntry) -> Result<u64, JournalError> {
        let mut line = serde_json::to_string(entry).map_err(JournalError::Encode)?;
        line.push('\n');

        let mut w = self.writer.lock().await;
        let offset = w.offset;
        w.file
            .write_all(line.as_bytes())
            .await
            .map_err(JournalError::Append)?;
        w.file.flush().await.map_err(JournalError::Append)?;
        w.offset += line.len() as u64;

        // Status changes are always synced: a transition must be durable
        // before it takes effect.
        let force_sync = matches!(entry, JournalEntry::StatusChange { .. });
        let sync_now = match self.durability {
            DurabilityLevel::SyncPerEntry => true,
            DurabilityLevel::Batched => {
                w.pending += 1;
                force_sync || w.pending >= self.batch_max_pending
            }
        };
        if sync_now {
            w.file.sync_data().await.map_err(JournalError::Sync)?;
            w.pending = 0;
        }

        Ok(offset)
    }

    async fn sync(&self) -> Result<(), JournalError> {
        let mut w = self.writer.lock().await;
        w.file.sync_data().await.map_err(JournalError::Sync)?;
        w.pending = 0;
        Ok(())
    }

    async fn open_cursor(&self, offset: u64) -> Result<Box<dyn JournalCursor>, JournalError> {
        // Independent read handle: cursors never disturb the writer.
        let file = File::open(&self.path).await.map_err(JournalError::Read)?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(JournalError::Read)?;
        Ok(Box::new(JsonlCursor { reader, offset }))
    }

    async fn is_healthy(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }
}

/// Sequential reader over a JSONL journal file.
pub struct JsonlCursor {
    reader: BufReader<File>,
    offset: u64,
}

#[async_trait]
impl JournalCursor for JsonlCursor {
    async fn next_entry(&mut self) -> Result<Option<SealedEntry>, JournalError> {
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(JournalError::Read)?;
            if n == 0 {
                return Ok(None);
            }
            if !line.ends_with('\n') {
                // Torn final write: consistent prefix ends here.
                return Ok(None);
            }

            let start = self.offset;
            self.offset += n as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let entry = serde_json::from_str(trimmed).map_err(|e| JournalError::Decode {
                offset: start,
                source: e,
            })?;
            return Ok(Some(SealedEntry {
                offset: start,
                entry,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::packet::Packet;
    use crate::domain::state::{SystemState, TransitionReason};

    fn packet_entry(seq: u64) -> JournalEntry {
        JournalEntry::packet(
            seq * 10,
            Packet::new(seq, 1_000, 2_000, "test", "t", serde_json::json!({"n": seq})),
        )
    }

    async fn collect(journal: &JsonlJournal, from: u64) -> Vec<SealedEntry> {
        let mut cursor = journal.open_cursor(from).await.unwrap();
        let mut out = Vec::new();
        while let Some(sealed) = cursor.next_entry().await.unwrap() {
            out.push(sealed);
        }
        out
    }

    #[tokio::test]
    async fn append_then_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path, DurabilityLevel::SyncPerEntry, 1)
            .await
            .unwrap();

        for seq in 1..=3 {
            journal.append(&packet_entry(seq)).await.unwrap();
        }
        journal
            .append(&JournalEntry::status_change(
                40,
                SystemState::Connected,
                SystemState::Halted,
                TransitionReason::SequenceGapLoss {
                    expected: 4,
                    got: 9,
                },
            ))
            .await
            .unwrap();

        let entries = collect(&journal, 0).await;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].entry, packet_entry(1));
        assert_eq!(entries[3].entry.kind(), "STATUS_CHANGE");
    }

    #[tokio::test]
    async fn cursor_is_restartable_from_returned_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path, DurabilityLevel::SyncPerEntry, 1)
            .await
            .unwrap();
        for seq in 1..=5 {
            journal.append(&packet_entry(seq)).await.unwrap();
        }

        let all = collect(&journal, 0).await;
        let resumed = collect(&journal, all[2].offset).await;
        assert_eq!(resumed.len(), 3);
        assert_eq!(resumed[0], all[2]);
    }

    #[tokio::test]
    async fn torn_final_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path, DurabilityLevel::SyncPerEntry, 1)
            .await
            .unwrap();
        journal.append(&packet_entry(1)).await.unwrap();
        journal.append(&packet_entry(2)).await.unwrap();

        // Simulate a crash mid-append.
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(b"{\"kind\":\"PACKET\",\"version\":1,\"loc");
        std::fs::write(&path, content).unwrap();

        let entries = collect(&journal, 0).await;
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn batched_mode_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = JsonlJournal::open(&path, DurabilityLevel::Batched, 8)
            .await
            .unwrap();
        for seq in 1..=10 {
            journal.append(&packet_entry(seq)).await.unwrap();
        }
        journal.sync().await.unwrap();

        assert_eq!(collect(&journal, 0).await.len(), 10);
    }

    #[tokio::test]
    async fn reopen_appends_after_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let journal = JsonlJournal::open(&path, DurabilityLevel::SyncPerEntry, 1)
                .await
                .unwrap();
            journal.append(&packet_entry(1)).await.unwrap();
        }
        let journal = JsonlJournal::open(&path, DurabilityLevel::SyncPerEntry, 1)
            .await
            .unwrap();
        journal.append(&packet_entry(2)).await.unwrap();

        let entries = collect(&journal, 0).await;
        assert_eq!(entries.len(), 2);
        assert!(journal.is_healthy().await);
    }

    #[test]
    fn durability_level_parses_from_config_strings() {
        let level: DurabilityLevel = serde_json::from_str("\"sync_per_entry\"").unwrap();
        assert_eq!(level, DurabilityLevel::SyncPerEntry);
        let level: DurabilityLevel = serde_json::from_str("\"batched\"").unwrap();
        assert_eq!(level, DurabilityLevel::Batched);
    }
}
