use anyhow::Result;
use std::path::Path;

use super::storage::PartWriter;
use crate::checksum::{self, Sha256Hasher};
use crate::store::{FileRecord, Store};

/// In-memory resume state for one file's transfer: the validated offset, the
/// running hash of everything at or before that offset, and the open
/// `.part` file the fetcher appends to.
pub struct ResumeState {
    pub start_offset: u64,
    hasher: Sha256Hasher,
    writer: PartWriter,
}

impl ResumeState {
    pub fn current_offset(&self) -> u64 {
        self.start_offset
    }
}

/// Validates and prepares the on-disk `.part` file for a claimed record,
/// deciding whether to resume from a validated prefix or start fresh.
pub struct ResumeManager;

impl ResumeManager {
    /// Prepares resume state for `record`.
    ///
    /// - No `.part` file, or it's empty: starts fresh at offset 0.
    /// - `.part` exists and its first `downloaded_bytes` hash matches
    ///   `record.partial_checksum`: resumes from `downloaded_bytes`.
    /// - Hash mismatch, or the file is larger than `declared_size` (when
    ///   known): truncates and starts fresh, discarding the stale file.
    pub fn prepare(record: &FileRecord) -> Result<ResumeState> {
        let part_path = super::storage::part_path(&record.target_path);
        let on_disk_len = std::fs::metadata(&part_path).map(|m| m.len()).ok();

        let stale_oversized = record.declared_size > 0
            && on_disk_len.map(|len| len > record.declared_size).unwrap_or(false);

        let resumable = match (on_disk_len, &record.partial_checksum) {
            (Some(len), Some(expected)) if len > 0 && !stale_oversized => {
                let offset = record.downloaded_bytes.min(len);
                let actual = checksum::hash_prefix(&part_path, offset)?;
                (&actual == expected).then_some(offset)
            }
            _ => None,
        };

        match resumable {
            Some(offset) if offset > 0 => {
                let writer = PartWriter::open_for_resume(&record.target_path, offset)?;
                let mut hasher = Sha256Hasher::new();
                // Re-derive the running hasher state by replaying the
                // validated prefix; cheap relative to network transfer time
                // and keeps ResumeState's hasher authoritative going forward.
                hasher.update(&std::fs::read(&part_path)?[..offset as usize]);
                Ok(ResumeState { start_offset: offset, hasher, writer })
            }
            _ => {
                let writer = PartWriter::create(&record.target_path)?;
                Ok(ResumeState { start_offset: 0, hasher: Sha256Hasher::new(), writer })
            }
        }
    }

    /// Appends a freshly fetched chunk to disk and extends the running hash.
    /// Returns the new offset.
    pub fn extend(state: &mut ResumeState, chunk: &[u8]) -> Result<u64> {
        state.writer.append(chunk)?;
        state.hasher.update(chunk);
        state.start_offset += chunk.len() as u64;
        Ok(state.start_offset)
    }

    /// Durably persists progress: fsyncs the `.part` file, then records the
    /// new offset and prefix checksum in the store.
    pub async fn persist(file_id: &str, state: &ResumeState, store: &Store) -> Result<()> {
        state.writer.sync()?;
        let checksum = state.hasher.peek_hex();
        store.record_progress(file_id, state.start_offset, &checksum).await?;
        Ok(())
    }

    /// Finalizes the transfer: renames `.part` to the final path and returns
    /// the final checksum.
    pub fn finish(state: ResumeState, final_path: &Path) -> Result<String> {
        let checksum = state.hasher.finalize_hex();
        state.writer.finalize(final_path)?;
        Ok(checksum)
    }
}
