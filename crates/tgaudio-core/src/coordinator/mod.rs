//! Top-level entry point: wires [`crate::enumerator::Enumerator`],
//! [`crate::worker_pool::WorkerPool`], [`crate::rate_governor::RateGovernor`]
//! and the [`crate::store::Store`] together for one invocation and produces
//! a [`RunSummary`].

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::enumerator::Enumerator;
use crate::error::{CoreError, FailureKind};
use crate::rate_governor::RateGovernor;
use crate::store::{FileStatus, Store};
use crate::transport::Transport;
use crate::worker_pool::{DownloadTask, WorkerOutcome, WorkerPool};

/// Aggregate counts produced by one [`Coordinator::run`] invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total_bytes: u64,
}

/// Orchestrates one download invocation across any number of peers, sharing
/// a single [`RateGovernor`] and [`WorkerPool`].
pub struct Coordinator {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl Coordinator {
    pub fn new(store: Store, transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            transport,
            config: Arc::new(config),
        }
    }

    /// Builds a Coordinator around an already-shared store handle, e.g. when
    /// a transport reconnect replaces the session without reopening the
    /// database.
    pub fn with_store(store: Arc<Store>, transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            store,
            transport,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Clones the shared store handle so it can outlive this Coordinator,
    /// e.g. to hand to a follow-up `with_store` call.
    pub fn store_handle(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Runs enumeration and download for every peer in `peers`, applying the
    /// configured global admission limit across all of them, and returns
    /// once every peer is exhausted (or the limit is reached) and every
    /// in-flight fetch has drained.
    ///
    /// Two sources feed the [`WorkerPool`]: the [`Enumerator`], which admits
    /// brand-new audio messages, and a requeue path that resubmits any
    /// record left PENDING by a prior crash (via `recover_in_progress`) or
    /// by a retriable failure earlier in this same run. Both paths refresh
    /// the [`crate::transport::FileRef`] before resubmitting, since a stale
    /// reference carried over from a previous run or a failed attempt may no
    /// longer be valid.
    ///
    /// Termination is tracked explicitly via `in_flight` rather than by
    /// waiting for the pool's outcome channel to close: the pool's ingress
    /// sender is only dropped inside `drain`, so a loop that waited on that
    /// channel closing on its own would never see it happen before `drain`
    /// runs. Instead the loop counts every task admitted (by the enumerator
    /// or a requeue) against every terminal outcome observed, and breaks on
    /// its own once enumeration has finished, no requeue is still in
    /// flight, and the count reaches zero — at which point every ingress
    /// sender this function owns is dropped before `drain` joins the
    /// workers.
    pub async fn run(&self, peers: &[String], cancel: CancellationToken) -> Result<RunSummary, CoreError> {
        let reverted = self.store.recover_in_progress().await?;
        if reverted > 0 {
            tracing::info!(reverted, "reclaimed records stranded in_progress from a prior run");
        }
        let stranded = self.store.iter_by_status(FileStatus::Pending).await?;

        let rate_governor = Arc::new(RateGovernor::from_config(&self.config));
        let mut pool = WorkerPool::spawn(
            self.store.clone(),
            self.transport.clone(),
            rate_governor,
            self.config.clone(),
            cancel.clone(),
        );
        let submit_tx = pool.submit_sender();

        let mut in_flight: i64 = 0;
        let mut retry_tasks: JoinSet<bool> = JoinSet::new();

        for record in stranded {
            if requeue_file(&self.store, &*self.transport, &submit_tx, record.file_id).await {
                in_flight += 1;
            }
        }

        let admitted = Arc::new(AtomicU64::new(0));
        let mut enumerator_handle = {
            let store = self.store.clone();
            let transport = self.transport.clone();
            let config = self.config.clone();
            let admitted = admitted.clone();
            let peers = peers.to_vec();
            let cancel = cancel.clone();
            let tx = submit_tx.clone();

            tokio::spawn(async move { run_enumeration(store, transport, config, peers, admitted, tx, cancel).await })
        };

        let mut summary = RunSummary::default();
        let mut fatal: Option<(FailureKind, String)> = None;
        let mut enumeration_done = false;

        loop {
            if enumeration_done && in_flight == 0 && retry_tasks.is_empty() {
                break;
            }

            tokio::select! {
                outcome = pool.next_outcome() => {
                    match outcome {
                        Some(outcome) => {
                            self.apply_outcome(outcome, &mut summary, &mut fatal, &cancel, &submit_tx, &mut in_flight, &mut retry_tasks)
                        }
                        None => break,
                    }
                }
                Some(retry_result) = retry_tasks.join_next(), if !retry_tasks.is_empty() => {
                    match retry_result {
                        Ok(resubmitted) => {
                            if !resubmitted {
                                in_flight -= 1;
                            }
                        }
                        Err(join_err) => {
                            tracing::warn!(error = %join_err, "requeue task panicked");
                            in_flight -= 1;
                        }
                    }
                }
                result = &mut enumerator_handle, if !enumeration_done => {
                    enumeration_done = true;
                    match result {
                        Ok(total_emitted) => in_flight += total_emitted as i64,
                        Err(join_err) => tracing::warn!(error = %join_err, "enumeration task panicked"),
                    }
                }
            }
        }

        drop(submit_tx);
        pool.drain().await;

        if let Some((kind, message)) = fatal {
            return Err(CoreError::Fatal { kind, message });
        }

        Ok(summary)
    }

    /// Folds one [`WorkerOutcome`] into the running [`RunSummary`]. A
    /// retriable failure (the worker pool has already applied its backoff
    /// delay and flipped the record back to PENDING) is requeued here rather
    /// than waiting for the next invocation's enumeration pass, which would
    /// never rediscover it once the peer cursor has moved past its message.
    /// `in_flight` isn't decremented for a retriable failure until its
    /// spawned requeue attempt resolves, since the record hasn't actually
    /// left the pipeline yet.
    #[allow(clippy::too_many_arguments)]
    fn apply_outcome(
        &self,
        outcome: WorkerOutcome,
        summary: &mut RunSummary,
        fatal: &mut Option<(FailureKind, String)>,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<DownloadTask>,
        in_flight: &mut i64,
        retry_tasks: &mut JoinSet<bool>,
    ) {
        match outcome {
            WorkerOutcome::Completed { bytes, .. } => {
                summary.attempted += 1;
                summary.completed += 1;
                summary.total_bytes += bytes;
                *in_flight -= 1;
            }
            WorkerOutcome::Failed { file_id, will_retry, .. } => {
                summary.attempted += 1;
                if will_retry {
                    let store = self.store.clone();
                    let transport = self.transport.clone();
                    let tx = tx.clone();
                    retry_tasks.spawn(async move { requeue_file(&store, &*transport, &tx, file_id).await });
                } else {
                    summary.failed += 1;
                    *in_flight -= 1;
                }
            }
            WorkerOutcome::Skipped { .. } => {
                summary.skipped += 1;
                *in_flight -= 1;
            }
            WorkerOutcome::Fatal { kind, message } => {
                *fatal = Some((kind, message));
                cancel.cancel();
                *in_flight -= 1;
            }
        }
    }
}

/// Re-admits a PENDING record into the [`WorkerPool`]'s ingress queue,
/// fetching a fresh [`crate::transport::FileRef`] first since the one
/// carried by a stranded or retried record may have expired. Silently
/// leaves the record PENDING for a later run if the transport can't
/// currently resolve it (e.g. the peer is temporarily unreachable).
/// Returns whether the record was actually resubmitted, so callers can
/// keep an accurate in-flight count.
async fn requeue_file(store: &Store, transport: &dyn Transport, tx: &mpsc::Sender<DownloadTask>, file_id: String) -> bool {
    let record = match store.get_file(&file_id).await {
        Ok(Some(record)) if record.status == FileStatus::Pending => record,
        Ok(_) => return false,
        Err(err) => {
            tracing::warn!(file_id, error = %err, "store unreachable while requeuing a pending record");
            return false;
        }
    };

    match transport.refresh_file_ref(&record.peer_id, record.message_id).await {
        Ok(file_ref) => {
            let task = DownloadTask {
                record,
                file_ref,
                priority: 1,
            };
            tx.send(task).await.is_ok()
        }
        Err(err) => {
            tracing::warn!(file_id, error = %err, "failed to refresh file reference, leaving pending for a later run");
            false
        }
    }
}

/// Enumerates every peer in turn and returns the total number of tasks
/// admitted into the pool across all of them, so the caller can fold it
/// into its in-flight accounting once this resolves.
async fn run_enumeration(
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    peers: Vec<String>,
    admitted: Arc<AtomicU64>,
    tx: tokio::sync::mpsc::Sender<DownloadTask>,
    cancel: CancellationToken,
) -> u64 {
    let mut total_emitted = 0u64;
    for peer_id in peers {
        if cancel.is_cancelled() {
            break;
        }
        let enumerator = Enumerator::new(&store, &*transport, &config);
        match enumerator
            .enumerate_peer(&peer_id, &admitted, config.global_limit, &tx)
            .await
        {
            Ok(stats) => {
                tracing::info!(
                    peer_id,
                    emitted = stats.emitted,
                    skipped = stats.skipped_existing,
                    "peer enumerated"
                );
                total_emitted += stats.emitted;
                if stats.reached_global_limit {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(peer_id, error = %err, "enumeration failed for peer, continuing with remaining peers");
            }
        }
    }
    total_emitted
}
