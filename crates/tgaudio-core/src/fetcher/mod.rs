//! Single-file chunked transfer against the [`crate::transport::Transport`]
//! contract: pulls chunks under [`crate::rate_governor::RateGovernor`]
//! admission, extends the resume hash, and periodically checkpoints
//! progress to the [`crate::store::Store`].

mod error;

pub use error::FetchError;

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::FailureKind;
use crate::rate_governor::RateGovernor;
use crate::resume::{ResumeManager, ResumeState};
use crate::store::{FileRecord, Store};
use crate::transport::{FileRef, Transport, TransportError};

/// How many chunks accumulate between progress checkpoints, absent a time
/// trigger. Mirrors the spec's "every P chunks OR every T seconds".
const CHECKPOINT_EVERY_CHUNKS: u32 = 4;
const CHECKPOINT_EVERY: Duration = Duration::from_secs(5);

/// Outcome of a successful [`Fetcher::run`] call.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub final_size: u64,
    pub final_checksum: String,
}

/// Drives one file's transfer from a claimed [`FileRecord`] to completion,
/// a retriable/non-retriable error, or cooperative cancellation.
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    rate_governor: &'a RateGovernor,
    store: &'a Store,
    config: &'a Config,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        rate_governor: &'a RateGovernor,
        store: &'a Store,
        config: &'a Config,
    ) -> Self {
        Self {
            transport,
            rate_governor,
            store,
            config,
        }
    }

    /// Runs the chunked transfer for `record`, using `file_ref` to address
    /// the remote payload. `file_ref` may be replaced mid-flight if the
    /// transport signals [`TransportError::FileReferenceExpired`].
    pub async fn run(
        &self,
        record: &FileRecord,
        mut file_ref: FileRef,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let mut state = ResumeManager::prepare(record).map_err(|e| non_retriable(FailureKind::Storage, e))?;
        let mut since_checkpoint_chunks: u32 = 0;
        let mut last_checkpoint = Instant::now();
        let mut declared_size = record.declared_size;

        loop {
            if cancel.is_cancelled() {
                self.checkpoint(&record.file_id, &state).await?;
                return Err(FetchError::Cancelled);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.checkpoint(&record.file_id, &state).await?;
                    return Err(FetchError::Cancelled);
                }
                _ = self.rate_governor.acquire(1) => {}
            }

            let offset = state.current_offset();
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    self.checkpoint(&record.file_id, &state).await?;
                    return Err(FetchError::Cancelled);
                }
                res = tokio::time::timeout(
                    Duration::from_secs(self.config.chunk_timeout_seconds),
                    self.transport.fetch_chunk(&file_ref, offset, self.config.chunk_size_bytes),
                ) => res,
            };

            let chunk = match chunk {
                Ok(Ok(c)) => c,
                Ok(Err(TransportError::FloodWait(secs))) => {
                    self.rate_governor.penalize(Duration::from_secs(secs)).await;
                    continue;
                }
                Ok(Err(TransportError::FileReferenceExpired)) => {
                    file_ref = self
                        .transport
                        .refresh_file_ref(&record.peer_id, record.message_id)
                        .await
                        .map_err(|e| retriable(FailureKind::FileReferenceExpired, e))?;
                    continue;
                }
                Ok(Err(TransportError::Unauthorized)) => {
                    self.checkpoint(&record.file_id, &state).await?;
                    return Err(FetchError::NonRetriable {
                        kind: FailureKind::Auth,
                        message: "session unauthorized".to_string(),
                    });
                }
                Ok(Err(TransportError::Other(msg))) => {
                    self.checkpoint(&record.file_id, &state).await?;
                    return Err(FetchError::Retriable {
                        kind: FailureKind::Transient,
                        message: msg,
                    });
                }
                Err(_elapsed) => {
                    self.checkpoint(&record.file_id, &state).await?;
                    return Err(FetchError::Retriable {
                        kind: FailureKind::Transient,
                        message: format!("chunk timed out after {}s", self.config.chunk_timeout_seconds),
                    });
                }
            };

            if let Some(observed) = chunk.observed_size {
                if declared_size == 0 {
                    declared_size = observed;
                } else if declared_size != observed {
                    return Err(FetchError::NonRetriable {
                        kind: FailureKind::Integrity,
                        message: format!(
                            "observed size {observed} disagrees with previously declared {declared_size}"
                        ),
                    });
                }
            }

            let new_offset = ResumeManager::extend(&mut state, &chunk.bytes)
                .map_err(|e| non_retriable(FailureKind::Storage, e))?;
            since_checkpoint_chunks += 1;

            if since_checkpoint_chunks >= CHECKPOINT_EVERY_CHUNKS
                || last_checkpoint.elapsed() >= CHECKPOINT_EVERY
            {
                self.checkpoint(&record.file_id, &state).await?;
                since_checkpoint_chunks = 0;
                last_checkpoint = Instant::now();
            }

            if chunk.is_last {
                self.checkpoint(&record.file_id, &state).await?;

                if declared_size > 0 && new_offset != declared_size {
                    return Err(FetchError::NonRetriable {
                        kind: FailureKind::Integrity,
                        message: format!(
                            "transfer ended at {new_offset} bytes but declared size was {declared_size}"
                        ),
                    });
                }

                let final_checksum = ResumeManager::finish(state, &record.target_path)
                    .map_err(|e| non_retriable(FailureKind::Storage, e))?;
                self.store
                    .complete(&record.file_id, &final_checksum, new_offset)
                    .await
                    .map_err(|e| non_retriable(FailureKind::Internal, e))?;

                return Ok(FetchOutcome {
                    final_size: new_offset,
                    final_checksum,
                });
            }
        }
    }

    async fn checkpoint(&self, file_id: &str, state: &ResumeState) -> Result<(), FetchError> {
        ResumeManager::persist(file_id, state, self.store)
            .await
            .map_err(|e| non_retriable(FailureKind::Storage, e))
    }
}

fn retriable(kind: FailureKind, err: impl std::fmt::Display) -> FetchError {
    FetchError::Retriable {
        kind,
        message: err.to_string(),
    }
}

fn non_retriable(kind: FailureKind, err: impl std::fmt::Display) -> FetchError {
    FetchError::NonRetriable {
        kind,
        message: err.to_string(),
    }
}
