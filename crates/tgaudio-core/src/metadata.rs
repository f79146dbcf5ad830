//! The MetadataExtractor contract: post-download tag enrichment.
//!
//! This runs after [`crate::store::Store::complete`] and is non-fatal on
//! failure — a file that downloaded correctly but has unreadable tags is
//! still a successful download.

use async_trait::async_trait;
use std::path::Path;

/// Tags extracted from a completed audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    pub format: Option<String>,
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> anyhow::Result<Metadata>;
}

/// An extractor that never fails and never finds anything, used where tag
/// enrichment is configured off or as a test double.
pub struct NullExtractor;

#[async_trait]
impl MetadataExtractor for NullExtractor {
    async fn extract(&self, _path: &Path) -> anyhow::Result<Metadata> {
        Ok(Metadata::default())
    }
}
