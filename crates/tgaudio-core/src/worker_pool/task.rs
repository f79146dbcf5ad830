use crate::error::FailureKind;
use crate::store::FileRecord;
use crate::transport::FileRef;

/// A queued unit of work: a not-yet-claimed [`FileRecord`] snapshot plus the
/// transport handle needed to fetch it. In-memory only — never persisted,
/// discarded on completion or failure per the spec's task lifecycle.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub record: FileRecord,
    pub file_ref: FileRef,
    /// Scheduling hint; the pool doesn't currently reorder its FIFO ingress
    /// queue by priority, but the field is carried so a future scheduler can.
    pub priority: u8,
}

/// Reported by a worker once a task leaves the {Fetching, Retrying} states.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    Completed { file_id: String, bytes: u64 },
    Failed {
        file_id: String,
        kind: FailureKind,
        message: String,
        will_retry: bool,
    },
    /// Lost the claim race to another worker; not counted as a failure.
    Skipped { file_id: String, reason: FailureKind },
    /// An error severe enough to abort the whole run after a clean drain.
    Fatal { kind: FailureKind, message: String },
}
