//! `tgaudio performance` – recent throughput derived from completed files.
//!
//! No separate metrics store is introduced; this reads straight off the
//! [`Store`]'s completed records, matching the non-goal of adding an
//! observability layer beyond structured logging.

use anyhow::Result;
use tgaudio_core::store::{FileStatus, Store};

pub async fn run_performance(store: &Store) -> Result<()> {
    let completed = store.iter_by_status(FileStatus::Completed).await?;
    if completed.is_empty() {
        println!("No completed downloads yet.");
        return Ok(());
    }

    let total_bytes: u64 = completed.iter().map(|r| r.downloaded_bytes).sum();
    let total_files = completed.len() as u64;
    let avg_bytes = total_bytes / total_files.max(1);

    println!("completed files: {total_files}");
    println!("total bytes:     {total_bytes}");
    println!("average size:    {avg_bytes} bytes/file");

    let retried: u64 = completed.iter().filter(|r| r.attempts > 1).count() as u64;
    println!("retried at least once: {retried}/{total_files}");
    Ok(())
}
