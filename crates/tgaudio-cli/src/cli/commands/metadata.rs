//! `tgaudio metadata <file_id>` – print a stored record plus extracted tags.

use anyhow::Result;
use tgaudio_core::metadata::MetadataExtractor;
use tgaudio_core::store::Store;

pub async fn run_metadata(store: &Store, extractor: &dyn MetadataExtractor, file_id: &str) -> Result<()> {
    let Some(record) = store.get_file(file_id).await? else {
        anyhow::bail!("no record for file_id '{file_id}'");
    };

    println!("file_id:    {}", record.file_id);
    println!("peer_id:    {}", record.peer_id);
    println!("message_id: {}", record.message_id);
    println!("status:     {}", record.status.as_str());
    println!("format:     {}", record.format);
    println!("mime:       {}", record.mime);
    println!("size:       {} / {} bytes", record.downloaded_bytes, record.declared_size);
    println!("path:       {}", record.target_path.display());
    if let Some(kind) = &record.last_error_kind {
        println!("last error: {kind}");
    }

    if record.status != tgaudio_core::store::FileStatus::Completed {
        return Ok(());
    }

    match extractor.extract(&record.target_path).await {
        Ok(tags) => {
            println!();
            println!("title:    {}", tags.title.as_deref().unwrap_or("-"));
            println!("artist:   {}", tags.artist.as_deref().unwrap_or("-"));
            println!("album:    {}", tags.album.as_deref().unwrap_or("-"));
            if let Some(secs) = tags.duration_seconds {
                println!("duration: {:.1}s", secs);
            }
            if let Some(kbps) = tags.bitrate_kbps {
                println!("bitrate:  {kbps} kbps");
            }
        }
        Err(err) => {
            tracing::debug!(file_id, error = %err, "tag extraction failed");
            println!();
            println!("(no tags could be extracted: {err})");
        }
    }

    Ok(())
}
