//! Local filesystem contract: sanitized paths and free-space checks.

use std::path::{Path, PathBuf};

/// Sanitizes a candidate filename for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, and control characters with `_`
/// - Trims leading/trailing spaces and dots
/// - Collapses consecutive underscores
/// - Limits length to 255 bytes (Linux NAME_MAX)
pub fn sanitize_filename(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            '_'
        } else if c == ' ' || c == '\t' {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '\t' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds the target path for a file record: `download_dir/sanitized(name)`.
pub fn target_path(download_dir: &Path, file_id: &str, suggested_name: &str) -> PathBuf {
    let sanitized = sanitize_filename(suggested_name);
    let name = if sanitized.is_empty() {
        sanitize_filename(file_id)
    } else {
        sanitized
    };
    download_dir.join(name)
}

/// Returns true if the filesystem backing `dir` has at least `needed_bytes`
/// free. Used to pre-emptively skip a file rather than start a transfer that
/// cannot finish.
#[cfg(unix)]
pub fn has_free_space(dir: &Path, needed_bytes: u64) -> std::io::Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let available = stat.f_bavail as u64 * stat.f_frsize as u64;
    Ok(available >= needed_bytes)
}

#[cfg(not(unix))]
pub fn has_free_space(_dir: &Path, _needed_bytes: u64) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_slash_and_backslash() {
        assert_eq!(sanitize_filename("a/b\\c.mp3"), "a_b_c.mp3");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  ..  song.mp3  ..  "), "song.mp3");
    }

    #[test]
    fn collapses_underscores() {
        assert_eq!(sanitize_filename("song___name.mp3"), "song_name.mp3");
    }

    #[test]
    fn falls_back_to_file_id_when_name_sanitizes_to_empty() {
        let p = target_path(Path::new("/music"), "abc123", "...");
        assert_eq!(p, Path::new("/music/abc123"));
    }

    #[test]
    fn free_space_check_on_tmp_succeeds_for_small_amount() {
        let dir = tempfile::tempdir().unwrap();
        assert!(has_free_space(dir.path(), 1).unwrap());
    }
}
