//! `tgaudio stats` – aggregate counts per status and per format.

use anyhow::Result;
use std::collections::BTreeMap;
use tgaudio_core::store::{FileStatus, Store};

const ALL_STATUSES: [FileStatus; 5] = [
    FileStatus::Pending,
    FileStatus::InProgress,
    FileStatus::Completed,
    FileStatus::Failed,
    FileStatus::Skipped,
];

pub async fn run_stats(store: &Store) -> Result<()> {
    let mut by_format: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_bytes = 0u64;
    let mut total_files = 0u64;

    println!("{:<12} {:>8}", "STATUS", "COUNT");
    for status in ALL_STATUSES {
        let records = store.iter_by_status(status).await?;
        println!("{:<12} {:>8}", status.as_str(), records.len());
        total_files += records.len() as u64;
        for r in &records {
            *by_format.entry(r.format.clone()).or_default() += 1;
            if r.status == FileStatus::Completed {
                total_bytes += r.downloaded_bytes;
            }
        }
    }

    println!();
    println!("{:<12} {:>8}", "FORMAT", "COUNT");
    for (format, count) in &by_format {
        println!("{:<12} {:>8}", format, count);
    }

    println!();
    println!("{total_files} file(s) tracked, {total_bytes} byte(s) completed");
    Ok(())
}
