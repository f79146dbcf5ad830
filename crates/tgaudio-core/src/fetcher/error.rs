use crate::error::FailureKind;
use std::fmt;

/// Outcome of a single [`super::Fetcher::run`] call, beyond a clean finish.
#[derive(Debug)]
pub enum FetchError {
    /// The worker pool should reschedule this file for another attempt.
    Retriable { kind: FailureKind, message: String },
    /// The file should move straight to FAILED.
    NonRetriable { kind: FailureKind, message: String },
    /// A cancellation signal arrived; progress up to the last chunk was
    /// persisted and the record is left IN_PROGRESS for reclaiming.
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Retriable { kind, message } => write!(f, "retriable ({kind}): {message}"),
            FetchError::NonRetriable { kind, message } => write!(f, "non-retriable ({kind}): {message}"),
            FetchError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            FetchError::Retriable { kind, .. } | FetchError::NonRetriable { kind, .. } => Some(*kind),
            FetchError::Cancelled => None,
        }
    }
}
