//! Sequential `.part` file writer with atomic finalize.
//!
//! Telegram delivers a file as one ordered chunk stream rather than
//! addressable byte ranges, so unlike an HTTP range-download's concurrent
//! `pwrite`-at-offset writer, this one only ever appends.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to the final path while a download is incomplete.
pub const TEMP_SUFFIX: &str = ".part";

/// Returns `final_path` with [`TEMP_SUFFIX`] appended.
pub fn part_path(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(TEMP_SUFFIX);
    PathBuf::from(os)
}

/// A `.part` file opened for sequential appends.
pub struct PartWriter {
    file: File,
    part_path: PathBuf,
}

impl PartWriter {
    /// Creates a fresh `.part` file, truncating any existing content.
    pub fn create(final_path: &Path) -> Result<Self> {
        let part_path = part_path(final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .with_context(|| format!("create {}", part_path.display()))?;
        Ok(Self { file, part_path })
    }

    /// Opens an existing `.part` file, truncates it to `validated_offset`
    /// (discarding any unvalidated tail), and seeks to the end so the next
    /// `append` continues exactly where validation left off.
    pub fn open_for_resume(final_path: &Path, validated_offset: u64) -> Result<Self> {
        let part_path = part_path(final_path);
        let mut file = File::options()
            .read(true)
            .write(true)
            .open(&part_path)
            .with_context(|| format!("open {}", part_path.display()))?;
        file.set_len(validated_offset)
            .with_context(|| format!("truncate {} to {}", part_path.display(), validated_offset))?;
        file.seek(SeekFrom::Start(validated_offset))?;
        Ok(Self { file, part_path })
    }

    /// Preallocates `size` bytes: `posix_fallocate` on Unix, falling back to
    /// `set_len` on failure or non-Unix targets.
    pub fn preallocate(&mut self, size: u64) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size).context("preallocate via set_len")?;
        Ok(())
    }

    /// Appends `data` at the writer's current position.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).context("append to part file")
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("sync part file")
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Atomically renames the `.part` file to `final_path`. Call `sync`
    /// first for durability.
    pub fn finalize(self, final_path: &Path) -> Result<()> {
        let part_path = self.part_path.clone();
        drop(self.file);
        std::fs::rename(&part_path, final_path)
            .with_context(|| format!("rename {} to {}", part_path.display(), final_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(part_path(Path::new("song.mp3")).to_string_lossy(), "song.mp3.part");
    }

    #[test]
    fn create_append_finalize_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("song.mp3");
        let mut w = PartWriter::create(&final_path).unwrap();
        w.append(b"hello ").unwrap();
        w.append(b"world").unwrap();
        w.sync().unwrap();
        w.finalize(&final_path).unwrap();

        assert!(!part_path(&final_path).exists());
        let mut buf = String::new();
        File::open(&final_path).unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello world");
    }

    #[test]
    fn resume_truncates_to_validated_offset_and_appends_after() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("song.mp3");
        let mut w = PartWriter::create(&final_path).unwrap();
        w.append(b"hello world, extra garbage").unwrap();
        w.sync().unwrap();
        drop(w);

        let mut resumed = PartWriter::open_for_resume(&final_path, 5).unwrap();
        resumed.append(b" world").unwrap();
        resumed.sync().unwrap();
        resumed.finalize(&final_path).unwrap();

        let mut buf = String::new();
        File::open(&final_path).unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello world");
    }
}
