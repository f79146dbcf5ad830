//! `tgaudio search [query]` – list stored files, optionally filtered.

use anyhow::Result;
use tgaudio_core::store::{FileRecord, FileStatus, Store};

const ALL_STATUSES: [FileStatus; 5] = [
    FileStatus::Pending,
    FileStatus::InProgress,
    FileStatus::Completed,
    FileStatus::Failed,
    FileStatus::Skipped,
];

pub async fn run_search(
    store: &Store,
    query: Option<String>,
    format: Option<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    status: Option<String>,
) -> Result<()> {
    let statuses: Vec<FileStatus> = match status.as_deref() {
        Some(s) => vec![parse_status(s)?],
        None => ALL_STATUSES.to_vec(),
    };

    let mut records: Vec<FileRecord> = Vec::new();
    for status in statuses {
        records.extend(store.iter_by_status(status).await?);
    }

    let query_lower = query.as_deref().map(str::to_lowercase);
    records.retain(|r| {
        query_lower.as_ref().map_or(true, |q| file_name(r).to_lowercase().contains(q))
            && format.as_deref().map_or(true, |f| r.format.eq_ignore_ascii_case(f))
            && min_size.map_or(true, |min| r.declared_size >= min)
            && max_size.map_or(true, |max| r.declared_size <= max)
    });

    if records.is_empty() {
        println!("No matching files.");
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:<7} {:>12} {:<28} {}",
        "STATUS", "PEER", "FORMAT", "SIZE", "FILE", "NAME"
    );
    for r in &records {
        println!(
            "{:<10} {:<10} {:<7} {:>12} {:<28} {}",
            r.status.as_str(),
            r.peer_id,
            r.format,
            r.declared_size,
            r.file_id,
            file_name(r),
        );
    }
    println!("{} file(s)", records.len());
    Ok(())
}

fn file_name(r: &FileRecord) -> String {
    r.target_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| r.file_id.clone())
}

fn parse_status(s: &str) -> Result<FileStatus> {
    match s.to_ascii_lowercase().as_str() {
        "pending" => Ok(FileStatus::Pending),
        "in_progress" | "in-progress" => Ok(FileStatus::InProgress),
        "completed" | "complete" => Ok(FileStatus::Completed),
        "failed" => Ok(FileStatus::Failed),
        "skipped" => Ok(FileStatus::Skipped),
        other => anyhow::bail!("unknown status '{other}'"),
    }
}
