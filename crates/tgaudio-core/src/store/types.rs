use crate::error::FailureKind;
use std::path::PathBuf;

/// Lifecycle state of a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::InProgress => "in_progress",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "in_progress" => FileStatus::InProgress,
            "completed" => FileStatus::Completed,
            "failed" => FileStatus::Failed,
            "skipped" => FileStatus::Skipped,
            _ => FileStatus::Pending,
        }
    }
}

/// One remote audio artifact, tracked from first sight through completion.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_id: String,
    pub peer_id: String,
    pub message_id: i64,
    pub declared_size: u64,
    pub mime: String,
    pub format: String,
    pub target_path: PathBuf,
    pub status: FileStatus,
    pub downloaded_bytes: u64,
    pub partial_checksum: Option<String>,
    pub final_checksum: Option<String>,
    pub attempts: u32,
    pub last_error_kind: Option<String>,
}

impl FileRecord {
    /// A brand-new record as produced by the enumerator, before any bytes
    /// have been fetched.
    pub fn new_pending(
        file_id: String,
        peer_id: String,
        message_id: i64,
        declared_size: u64,
        mime: String,
        format: String,
        target_path: PathBuf,
    ) -> Self {
        Self {
            file_id,
            peer_id,
            message_id,
            declared_size,
            mime,
            format,
            target_path,
            status: FileStatus::Pending,
            downloaded_bytes: 0,
            partial_checksum: None,
            final_checksum: None,
            attempts: 0,
            last_error_kind: None,
        }
    }
}

/// Per-peer scan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCursor {
    pub last_scanned_message_id: i64,
}

/// Result of [`crate::store::Store::upsert_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyExists(FileRecord),
}

/// Result of [`crate::store::Store::try_claim`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(FileRecord),
    NotPending,
    NotFound,
}

/// Errors raised by [`crate::store::Store`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {file_id} not found")]
    NotFound { file_id: String },
    #[error("offset for {file_id} would move backward: current {current}, attempted {attempted}")]
    NonMonotonicOffset {
        file_id: String,
        current: u64,
        attempted: u64,
    },
    #[error("{file_id} already completed with a different checksum")]
    ConflictingCompletion { file_id: String },
    #[error("{file_id} is not in_progress (status={status}), refusing to complete it")]
    NotInProgress { file_id: String, status: String },
    #[error("peer cursor for {peer_id} would move backward: current {current}, attempted {attempted}")]
    NonMonotonicCursor {
        peer_id: String,
        current: i64,
        attempted: i64,
    },
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Non-persisted pairing of a [`FailureKind`] with free-form context,
/// recorded by [`crate::store::Store::fail`].
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}
