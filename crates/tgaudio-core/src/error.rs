//! Top-level error taxonomy shared across the engine's components.

use std::fmt;

/// Coarse classification of a failure, used to decide whether the
/// [`crate::worker_pool::WorkerPool`] retries a task or gives up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, connection reset, or other transient network failure.
    Transient,
    /// The remote file handle expired and must be refreshed before retrying.
    FileReferenceExpired,
    /// Session is invalid or revoked. Fatal at the coordinator level.
    Auth,
    /// Observed size or checksum mismatch at completion.
    Integrity,
    /// Local filesystem failure (disk full, permission denied).
    Storage,
    /// Another worker already claimed this record; not a failure.
    StateConflict,
    /// An invariant the engine relies on was violated.
    Internal,
}

impl FailureKind {
    /// Whether [`crate::worker_pool::WorkerPool`] should reschedule this
    /// failure for another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::FileReferenceExpired)
    }

    /// Whether this failure should abort the whole run rather than just the
    /// one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Auth | FailureKind::Internal)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::FileReferenceExpired => "file_reference_expired",
            FailureKind::Auth => "auth",
            FailureKind::Integrity => "integrity",
            FailureKind::Storage => "storage",
            FailureKind::StateConflict => "state_conflict",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Top-level error type surfaced by [`crate::coordinator::Coordinator`].
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("fatal failure ({kind}): {message}")]
    Fatal { kind: FailureKind, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
