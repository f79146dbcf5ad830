//! Bounded concurrent execution of [`crate::fetcher::Fetcher`] runs, with
//! retry/backoff applied to retriable failures.

mod task;

pub use task::{DownloadTask, WorkerOutcome};

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::FailureKind;
use crate::fetcher::{FetchError, Fetcher};
use crate::rate_governor::RateGovernor;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{ClaimOutcome, FailureRecord, Store};
use crate::transport::Transport;

/// Bounded, retrying executor for [`DownloadTask`]s. One instance is shared
/// by a whole [`crate::coordinator::Coordinator`] run; the ingress channel's
/// bounded capacity (`4 * max_workers`) is the backpressure signal the
/// Enumerator blocks on.
pub struct WorkerPool {
    tx: mpsc::Sender<DownloadTask>,
    outcomes: mpsc::UnboundedReceiver<WorkerOutcome>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.max_workers` worker loops, each pulling from a shared
    /// bounded ingress channel and reporting results on an unbounded
    /// outcome channel the Coordinator drains.
    pub fn spawn(
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
        rate_governor: Arc<RateGovernor>,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> Self {
        let queue_capacity = (config.max_workers * 4).max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let retry_policy = RetryPolicy::from_config(&config);

        let mut workers = Vec::with_capacity(config.max_workers);
        for worker_id in 0..config.max_workers {
            let rx = rx.clone();
            let store = store.clone();
            let transport = transport.clone();
            let rate_governor = rate_governor.clone();
            let config = config.clone();
            let cancel = cancel.clone();
            let outcome_tx = outcome_tx.clone();

            workers.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    rx,
                    store,
                    transport,
                    rate_governor,
                    config,
                    retry_policy,
                    cancel,
                    outcome_tx,
                )
                .await;
            }));
        }

        Self {
            tx,
            outcomes: outcome_rx,
            workers,
        }
    }

    /// Enqueues a task. Suspends if the bounded ingress queue is full,
    /// backpressuring the Enumerator.
    pub async fn submit(&self, task: DownloadTask) -> Result<(), DownloadTask> {
        self.tx.send(task).await.map_err(|e| e.0)
    }

    /// Clones the bounded ingress sender, so a producer (e.g. the
    /// Coordinator's enumeration task) can submit tasks without holding a
    /// reference to the pool itself.
    pub fn submit_sender(&self) -> mpsc::Sender<DownloadTask> {
        self.tx.clone()
    }

    /// Receives the next completed/failed task outcome. Returns `None` once
    /// every worker has exited and there is nothing left to report.
    pub async fn next_outcome(&mut self) -> Option<WorkerOutcome> {
        self.outcomes.recv().await
    }

    /// Closes the ingress queue and waits for every worker to finish its
    /// current task (or observe cancellation) and exit.
    pub async fn drain(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<DownloadTask>>>,
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    rate_governor: Arc<RateGovernor>,
    config: Arc<Config>,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    outcome_tx: mpsc::UnboundedSender<WorkerOutcome>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            tracing::debug!(worker_id, "ingress closed, worker exiting");
            return;
        };

        let file_id = task.record.file_id.clone();
        let claimed = match store.try_claim(&file_id).await {
            Ok(ClaimOutcome::Claimed(record)) => record,
            Ok(ClaimOutcome::NotPending) => {
                let _ = outcome_tx.send(WorkerOutcome::Skipped {
                    file_id,
                    reason: FailureKind::StateConflict,
                });
                continue;
            }
            Ok(ClaimOutcome::NotFound) => {
                tracing::warn!(worker_id, file_id, "claim target vanished from store");
                continue;
            }
            Err(err) => {
                let _ = outcome_tx.send(WorkerOutcome::Fatal {
                    kind: FailureKind::Internal,
                    message: format!("store unreachable while claiming {file_id}: {err}"),
                });
                return;
            }
        };

        let download_dir = claimed
            .target_path
            .parent()
            .unwrap_or(&config.download_dir)
            .to_path_buf();
        match crate::filesystem::has_free_space(&download_dir, claimed.declared_size) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(worker_id, file_id, "insufficient free space, skipping");
                let reason = FailureRecord {
                    kind: FailureKind::Storage,
                    message: "insufficient free space at claim time".into(),
                };
                if let Err(err) = store.skip(&file_id, &reason).await {
                    let _ = outcome_tx.send(WorkerOutcome::Fatal {
                        kind: FailureKind::Internal,
                        message: format!("store unreachable while skipping {file_id}: {err}"),
                    });
                    return;
                }
                let _ = outcome_tx.send(WorkerOutcome::Skipped {
                    file_id,
                    reason: FailureKind::Storage,
                });
                continue;
            }
            Err(err) => {
                tracing::warn!(worker_id, file_id, error = %err, "free space check failed, proceeding anyway");
            }
        }

        let fetcher = Fetcher::new(&*transport, &rate_governor, &store, &config);
        let result = fetcher.run(&claimed, task.file_ref.clone(), &cancel).await;

        match result {
            Ok(outcome) => {
                let _ = outcome_tx.send(WorkerOutcome::Completed {
                    file_id,
                    bytes: outcome.final_size,
                });
            }
            Err(FetchError::Cancelled) => {
                tracing::info!(worker_id, file_id, "fetch cancelled, record left in_progress");
                return;
            }
            Err(FetchError::NonRetriable { kind, message }) => {
                record_failure(&store, &outcome_tx, &file_id, kind, message, &retry_policy, claimed.attempts)
                    .await;
            }
            Err(FetchError::Retriable { kind, message }) => {
                let attempt = claimed.attempts + 1;
                if let RetryDecision::RetryAfter(delay) = retry_policy.decide(attempt, kind) {
                    tracing::debug!(worker_id, file_id, attempt, ?delay, "backing off before reschedule");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                record_failure(&store, &outcome_tx, &file_id, kind, message, &retry_policy, claimed.attempts)
                    .await;
            }
        }
    }
}

async fn record_failure(
    store: &Store,
    outcome_tx: &mpsc::UnboundedSender<WorkerOutcome>,
    file_id: &str,
    kind: FailureKind,
    message: String,
    retry_policy: &RetryPolicy,
    attempts_before: u32,
) {
    if kind.is_fatal() {
        let _ = outcome_tx.send(WorkerOutcome::Fatal {
            kind,
            message: format!("{kind}: {message}"),
        });
        return;
    }

    let failure = FailureRecord { kind, message: message.clone() };
    if let Err(err) = store.fail(file_id, &failure, retry_policy.max_attempts).await {
        let _ = outcome_tx.send(WorkerOutcome::Fatal {
            kind: FailureKind::Internal,
            message: format!("store unreachable while failing {file_id}: {err}"),
        });
        return;
    }

    let will_retry = kind.is_retriable() && attempts_before + 1 < retry_policy.max_attempts;
    let _ = outcome_tx.send(WorkerOutcome::Failed {
        file_id: file_id.to_string(),
        kind,
        message,
        will_retry,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::FileRecord;
    use crate::transport::{ChunkResult, Direction, FileRef, Message, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTransport {
        chunk_calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn fetch_chunk(
            &self,
            _file_ref: &FileRef,
            offset: u64,
            _length: u64,
        ) -> Result<ChunkResult, TransportError> {
            let call = self.chunk_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(TransportError::Other("reset".into()));
            }
            let _ = offset;
            Ok(ChunkResult {
                bytes: vec![1, 2, 3, 4],
                is_last: true,
                observed_size: None,
            })
        }

        async fn next_messages(
            &self,
            _peer_id: &str,
            _cursor: Option<i64>,
            _direction: Direction,
            _page_size: u32,
        ) -> Result<Vec<Message>, TransportError> {
            Ok(Vec::new())
        }

        async fn refresh_file_ref(
            &self,
            _peer_id: &str,
            _message_id: i64,
        ) -> Result<FileRef, TransportError> {
            Ok(FileRef {
                file_id: "f1".into(),
                access_hash: "h".into(),
            })
        }
    }

    fn record(dir: &std::path::Path, id: &str) -> FileRecord {
        FileRecord::new_pending(
            id.into(),
            "peer-1".into(),
            1,
            4,
            "audio/mpeg".into(),
            "mp3".into(),
            dir.join(format!("{id}.mp3")),
        )
    }

    #[tokio::test]
    async fn completes_a_single_task_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_memory().await.unwrap());
        let rec = record(dir.path(), "f1");
        store.upsert_file(&rec).await.unwrap();

        let transport: Arc<dyn Transport> = Arc::new(CountingTransport {
            chunk_calls: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let governor = Arc::new(RateGovernor::new(1000, 1000.0));
        let config = Arc::new(Config {
            max_workers: 1,
            ..Config::default()
        });
        let cancel = CancellationToken::new();

        let mut pool = WorkerPool::spawn(store.clone(), transport, governor, config, cancel.clone());
        pool.submit(DownloadTask {
            record: rec.clone(),
            file_ref: FileRef {
                file_id: "f1".into(),
                access_hash: "h".into(),
            },
            priority: 0,
        })
        .await
        .unwrap();

        let outcome = pool.next_outcome().await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Completed { .. }));
        pool.drain().await;

        let stored = store.get_file("f1").await.unwrap().unwrap();
        assert_eq!(stored.status, crate::store::FileStatus::Completed);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_memory().await.unwrap());
        let rec = record(dir.path(), "f1");
        store.upsert_file(&rec).await.unwrap();

        let transport: Arc<dyn Transport> = Arc::new(CountingTransport {
            chunk_calls: AtomicU32::new(0),
            fail_first_n: 1,
        });
        let governor = Arc::new(RateGovernor::new(1000, 1000.0));
        let config = Arc::new(Config {
            max_workers: 1,
            retry_base_delay_seconds: 0.01,
            retry_max_delay_seconds: 0.05,
            ..Config::default()
        });
        let cancel = CancellationToken::new();

        let mut pool = WorkerPool::spawn(store.clone(), transport, governor, config, cancel.clone());
        let task = DownloadTask {
            record: rec.clone(),
            file_ref: FileRef {
                file_id: "f1".into(),
                access_hash: "h".into(),
            },
            priority: 0,
        };
        pool.submit(task.clone()).await.unwrap();

        let first = pool.next_outcome().await.unwrap();
        assert!(matches!(first, WorkerOutcome::Failed { will_retry: true, .. }));

        // The store already flipped the record back to PENDING; resubmit it
        // the way a Coordinator's re-enumeration pass would.
        let rec2 = store.get_file("f1").await.unwrap().unwrap();
        pool.submit(DownloadTask {
            record: rec2,
            file_ref: task.file_ref,
            priority: 0,
        })
        .await
        .unwrap();

        let second = pool.next_outcome().await.unwrap();
        assert!(matches!(second, WorkerOutcome::Completed { .. }));
        pool.drain().await;
    }
}
