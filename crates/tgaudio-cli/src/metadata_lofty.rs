//! Concrete [`MetadataExtractor`] backed by `lofty`, the tag-reading crate
//! used across the pack's audio-player/downloader examples.

use async_trait::async_trait;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::Path;

use tgaudio_core::metadata::{Metadata, MetadataExtractor};

pub struct LoftyExtractor;

#[async_trait]
impl MetadataExtractor for LoftyExtractor {
    async fn extract(&self, path: &Path) -> anyhow::Result<Metadata> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_blocking(&path)).await?
    }
}

fn extract_blocking(path: &Path) -> anyhow::Result<Metadata> {
    let tagged_file = Probe::open(path)?.read()?;
    let properties = tagged_file.properties();
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    Ok(Metadata {
        title: tag.and_then(|t| t.title()).map(|s| s.into_owned()),
        artist: tag.and_then(|t| t.artist()).map(|s| s.into_owned()),
        album: tag.and_then(|t| t.album()).map(|s| s.into_owned()),
        duration_seconds: Some(properties.duration().as_secs_f64()),
        bitrate_kbps: properties.audio_bitrate(),
        format: Some(format!("{:?}", tagged_file.file_type())),
    })
}
