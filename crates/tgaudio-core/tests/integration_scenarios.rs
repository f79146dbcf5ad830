//! End-to-end scenarios driving a full [`Coordinator`] run against an
//! in-memory [`Transport`] double, covering the interrupted/resumed,
//! transient-retry, and exhausted-retries batch behaviors that the
//! in-crate `coordinator`/`fetcher` unit tests don't exercise together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tgaudio_core::config::Config;
use tgaudio_core::coordinator::Coordinator;
use tgaudio_core::resume::ResumeManager;
use tgaudio_core::store::{ClaimOutcome, FileStatus, Store};
use tgaudio_core::transport::{AudioInfo, ChunkResult, Direction, FileRef, Message, Transport, TransportError};
use tokio_util::sync::CancellationToken;

/// One fixed peer history, served once, with a per-file_id fault schedule:
/// fail the chunk request at the given byte offset with the given error,
/// exactly once.
struct ScriptedPeer {
    messages: Vec<Message>,
    bodies: HashMap<String, Vec<u8>>,
    served: Mutex<bool>,
    faults: Mutex<HashMap<String, Vec<(u64, FaultKind)>>>,
    chunk_calls: AtomicU32,
}

#[derive(Clone, Copy)]
enum FaultKind {
    Reset,
    AlwaysTimeout,
}

#[async_trait]
impl Transport for ScriptedPeer {
    async fn fetch_chunk(&self, file_ref: &FileRef, offset: u64, length: u64) -> Result<ChunkResult, TransportError> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);

        let mut faults = self.faults.lock().unwrap();
        if let Some(schedule) = faults.get_mut(&file_ref.file_id) {
            if let Some(pos) = schedule.iter().position(|(at, _)| *at == offset) {
                let (_, kind) = schedule[pos];
                match kind {
                    FaultKind::Reset => {
                        schedule.remove(pos);
                        return Err(TransportError::Other("connection reset".into()));
                    }
                    FaultKind::AlwaysTimeout => {
                        return Err(TransportError::Other("simulated timeout".into()));
                    }
                }
            }
        }
        drop(faults);

        let body = &self.bodies[&file_ref.file_id];
        let end = (offset + length).min(body.len() as u64);
        Ok(ChunkResult {
            bytes: body[offset as usize..end as usize].to_vec(),
            is_last: end >= body.len() as u64,
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
        let mut served = self.served.lock().unwrap();
        if *served {
            return Ok(Vec::new());
        }
        *served = true;
        Ok(self.messages.clone())
    }

    async fn refresh_file_ref(&self, _peer_id: &str, message_id: i64) -> Result<FileRef, TransportError> {
        self.messages
            .iter()
            .find(|m| m.message_id == message_id)
            .and_then(|m| m.audio.as_ref())
            .map(|audio| audio.file_ref.clone())
            .ok_or_else(|| TransportError::Other("message vanished".into()))
    }
}

fn message(id: i64, file_id: &str, size: u64) -> (Message, Vec<u8>) {
    let body = vec![(id % 251) as u8; size as usize];
    let msg = Message {
        message_id: id,
        audio: Some(AudioInfo {
            file_ref: FileRef {
                file_id: file_id.into(),
                access_hash: "h".into(),
            },
            declared_size: size,
            mime: "audio/mpeg".into(),
            suggested_name: format!("{file_id}.mp3"),
        }),
    };
    (msg, body)
}

/// S4: a transient reset at a mid-file offset causes one retry; the file
/// resumes from the faulted offset (not from zero) and completes, with
/// `attempts` reflecting the single retry.
#[tokio::test]
async fn transient_failure_retries_and_resumes_from_fault_offset() {
    let dir = tempfile::tempdir().unwrap();
    let (m1, b1) = message(1, "f1", 64 * 1024);
    let (m2, b2) = message(2, "f2", 64 * 1024);

    let mut bodies = HashMap::new();
    bodies.insert("f1".to_string(), b1);
    bodies.insert("f2".to_string(), b2);

    let mut faults = HashMap::new();
    faults.insert("f2".to_string(), vec![(32 * 1024, FaultKind::Reset)]);

    let transport: Arc<dyn Transport> = Arc::new(ScriptedPeer {
        messages: vec![m1, m2],
        bodies,
        served: Mutex::new(false),
        faults: Mutex::new(faults),
        chunk_calls: AtomicU32::new(0),
    });

    let store = Store::open_memory().await.unwrap();
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        max_workers: 1,
        chunk_size_bytes: 32 * 1024,
        retry_base_delay_seconds: 0.01,
        retry_max_delay_seconds: 0.05,
        ..Config::default()
    };
    let coordinator = Coordinator::new(store, transport, config);

    let summary = coordinator
        .run(&["peer-1".to_string()], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);

    let f2 = coordinator.store().get_file("f2").await.unwrap().unwrap();
    assert_eq!(f2.status, FileStatus::Completed);
    assert_eq!(f2.attempts, 1);
}

/// S5: a file that always times out exhausts its retry budget and ends
/// FAILED, while its peers still complete; the run itself still returns Ok.
#[tokio::test]
async fn exhausted_retries_leave_one_file_failed_without_aborting_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (m1, b1) = message(1, "f1", 4096);
    let (m2, b2) = message(2, "f2", 4096);
    let (m3, b3) = message(3, "f3", 4096);

    let mut bodies = HashMap::new();
    bodies.insert("f1".to_string(), b1);
    bodies.insert("f2".to_string(), b2);
    bodies.insert("f3".to_string(), b3);

    let mut faults = HashMap::new();
    faults.insert("f2".to_string(), vec![(0, FaultKind::AlwaysTimeout)]);

    let transport: Arc<dyn Transport> = Arc::new(ScriptedPeer {
        messages: vec![m1, m2, m3],
        bodies,
        served: Mutex::new(false),
        faults: Mutex::new(faults),
        chunk_calls: AtomicU32::new(0),
    });

    let store = Store::open_memory().await.unwrap();
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        max_workers: 2,
        max_attempts: 3,
        retry_base_delay_seconds: 0.01,
        retry_max_delay_seconds: 0.05,
        ..Config::default()
    };
    let coordinator = Coordinator::new(store, transport, config);

    let summary = coordinator
        .run(&["peer-1".to_string()], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let f2 = coordinator.store().get_file("f2").await.unwrap().unwrap();
    assert_eq!(f2.status, FileStatus::Failed);
    assert_eq!(f2.last_error_kind.as_deref(), Some("transient"));
}

/// S2-equivalent: a file claimed and partially written by a prior run that
/// crashed mid-transfer (no clean shutdown, so its `.part` file and store
/// row both reflect a partial write, and the process never got to mark it
/// completed) is reclaimed by `recover_in_progress` on the next invocation,
/// requeued, and resumed from the validated on-disk prefix rather than
/// redownloaded from zero.
#[tokio::test]
async fn interrupted_transfer_is_recovered_and_completed_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (m1, b1) = message(1, "f1", 256 * 1024);
    let mut bodies = HashMap::new();
    bodies.insert("f1".to_string(), b1.clone());

    let store = Store::open_memory().await.unwrap();
    let config = Config {
        download_dir: dir.path().to_path_buf(),
        max_workers: 1,
        chunk_size_bytes: 8 * 1024,
        ..Config::default()
    };

    let record = {
        let audio = m1.audio.as_ref().unwrap();
        tgaudio_core::FileRecord::new_pending(
            audio.file_ref.file_id.clone(),
            "peer-1".to_string(),
            m1.message_id,
            audio.declared_size,
            audio.mime.clone(),
            "mp3".to_string(),
            dir.path().join("f1.mp3"),
        )
    };
    store.upsert_file(&record).await.unwrap();
    let claimed = match store.try_claim("f1").await.unwrap() {
        ClaimOutcome::Claimed(r) => r,
        other => panic!("expected a fresh claim, got {other:?}"),
    };

    // Simulate a crash partway through: write the first chunk to the `.part`
    // file and persist its offset/checksum, then stop, exactly what a
    // process killed mid-fetch would leave behind, with no call to
    // `finish`/`complete`.
    let mut state = ResumeManager::prepare(&claimed).unwrap();
    ResumeManager::extend(&mut state, &b1[..32 * 1024]).unwrap();
    ResumeManager::persist("f1", &state, &store).await.unwrap();
    drop(state);

    let stranded = store.get_file("f1").await.unwrap().unwrap();
    assert_eq!(stranded.status, FileStatus::InProgress);
    assert_eq!(stranded.downloaded_bytes, 32 * 1024);

    let transport: Arc<dyn Transport> = Arc::new(ScriptedPeer {
        messages: vec![m1],
        bodies,
        served: Mutex::new(true),
        faults: Mutex::new(HashMap::new()),
        chunk_calls: AtomicU32::new(0),
    });
    let coordinator = Coordinator::with_store(Arc::new(store), transport, config);
    let summary = coordinator.run(&["peer-1".to_string()], CancellationToken::new()).await.unwrap();
    assert_eq!(summary.completed, 1);

    let done = coordinator.store().get_file("f1").await.unwrap().unwrap();
    assert_eq!(done.status, FileStatus::Completed);
    assert_eq!(std::fs::read(&done.target_path).unwrap(), b1);
}
