//! Streaming checksum support for partial and final file validation.
//!
//! `Sha256Hasher` satisfies the ChecksumEngine contract: it can be updated
//! incrementally as chunks land on disk, and it supports `clone()` so the
//! resume path can snapshot a running digest without finalizing it.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// An incremental SHA-256 digest, cheap to clone for snapshotting.
#[derive(Clone, Default)]
pub struct Sha256Hasher(Sha256);

impl Sha256Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }

    /// Returns the current digest without consuming the hasher, by cloning
    /// the internal state (the contract's "snapshot without finalizing").
    pub fn peek_hex(&self) -> String {
        hex::encode(self.0.clone().finalize())
    }
}

/// Hashes the first `prefix_len` bytes of a file on disk.
///
/// Used by [`crate::resume::ResumeManager`] to validate that a `.part` file's
/// on-disk prefix still matches the checksum recorded in the [`crate::store::Store`]
/// before trusting it as a resume point.
pub fn hash_prefix(path: &Path, prefix_len: u64) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256Hasher::new();
    let mut buf = [0u8; BUF_SIZE];
    let mut remaining = prefix_len;
    while remaining > 0 {
        let want = remaining.min(BUF_SIZE as u64) as usize;
        let n = f
            .read(&mut buf[..want])
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            anyhow::bail!(
                "file {} is shorter than requested prefix ({} bytes)",
                path.display(),
                prefix_len
            );
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hasher.finalize_hex())
}

/// Hashes an entire file. Used to compute the final checksum on completion.
pub fn hash_file(path: &Path) -> Result<String> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    hash_prefix(path, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_file_empty() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = hash_file(f.path()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_prefix_matches_incremental_hasher() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();

        let mut hasher = Sha256Hasher::new();
        hasher.update(b"hello");
        let snapshot = hasher.peek_hex();
        hasher.update(b" world");
        assert_ne!(snapshot, hasher.clone().finalize_hex());

        let on_disk_prefix = hash_prefix(f.path(), 5).unwrap();
        assert_eq!(on_disk_prefix, snapshot);
    }

    #[test]
    fn hash_prefix_rejects_short_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert!(hash_prefix(f.path(), 10).is_err());
    }
}
