//! Turns a peer's message history into [`crate::worker_pool::DownloadTask`]s:
//! pages messages from the [`crate::transport::Transport`], filters to audio
//! payloads, dedupes against the [`crate::store::Store`], and respects a
//! global admission limit shared across every peer in the run.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::config::{Config, Direction};
use crate::filesystem;
use crate::store::{FileRecord, FileStatus, Store, UpsertOutcome};
use crate::transport::{self, Transport};
use crate::worker_pool::DownloadTask;

/// Messages requested per page from the transport.
const PAGE_SIZE: u32 = 100;

/// Outcome of enumerating one peer in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    pub emitted: u64,
    pub skipped_existing: u64,
    pub reached_global_limit: bool,
}

pub struct Enumerator<'a> {
    store: &'a Store,
    transport: &'a dyn Transport,
    config: &'a Config,
}

impl<'a> Enumerator<'a> {
    pub fn new(store: &'a Store, transport: &'a dyn Transport, config: &'a Config) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// Walks `peer_id`'s history from the newest message backward until it
    /// reaches the message already marked as the peer's cursor, emitting a
    /// [`DownloadTask`] onto `tasks_tx` for every newly-admitted audio file.
    ///
    /// `admitted` is a run-wide atomic counter shared across every peer in
    /// this invocation; once it reaches `global_limit`, enumeration for
    /// every peer stops admitting further tasks (in-flight work is
    /// unaffected).
    pub async fn enumerate_peer(
        &self,
        peer_id: &str,
        admitted: &AtomicU64,
        global_limit: Option<u64>,
        tasks_tx: &mpsc::Sender<DownloadTask>,
    ) -> anyhow::Result<EnumerationStats> {
        let mut stats = EnumerationStats::default();
        let previous_cursor = self.store.get_peer_cursor(peer_id).await?.map(|c| c.last_scanned_message_id);
        let mut newest_seen: Option<i64> = None;
        // NewestFirst walks backward from the newest message, so the first
        // page always starts at the top of history. OldestFirst walks
        // forward, so it resumes right after the persisted cursor instead
        // of re-walking the whole history from message_id 0 every run.
        let mut page_cursor: Option<i64> = match self.config.direction {
            Direction::NewestFirst => None,
            Direction::OldestFirst => previous_cursor,
        };

        loop {
            if global_limit.map(|l| admitted.load(Ordering::SeqCst) >= l).unwrap_or(false) {
                stats.reached_global_limit = true;
                break;
            }

            let transport_direction = match self.config.direction {
                Direction::NewestFirst => transport::Direction::NewestFirst,
                Direction::OldestFirst => transport::Direction::OldestFirst,
            };
            let messages = self
                .transport
                .next_messages(peer_id, page_cursor, transport_direction, PAGE_SIZE)
                .await
                .map_err(|e| anyhow::anyhow!("{peer_id}: {e}"))?;

            if messages.is_empty() {
                break;
            }

            let mut reached_cursor = false;
            for message in &messages {
                if let Some(cursor) = previous_cursor {
                    if message.message_id <= cursor {
                        match self.config.direction {
                            // Descending walk: everything from here to the
                            // end of history is already processed too.
                            Direction::NewestFirst => {
                                reached_cursor = true;
                                break;
                            }
                            // Ascending walk: an already-seen id can only
                            // appear if the transport re-served the cursor
                            // message itself; skip it and keep climbing.
                            Direction::OldestFirst => continue,
                        }
                    }
                }

                newest_seen = Some(newest_seen.map_or(message.message_id, |n| n.max(message.message_id)));
                page_cursor = Some(match self.config.direction {
                    Direction::NewestFirst => page_cursor.map_or(message.message_id, |c| c.min(message.message_id)),
                    Direction::OldestFirst => page_cursor.map_or(message.message_id, |c| c.max(message.message_id)),
                });

                let Some(audio) = &message.audio else {
                    continue;
                };

                if global_limit.map(|l| admitted.load(Ordering::SeqCst) >= l).unwrap_or(false) {
                    stats.reached_global_limit = true;
                    break;
                }

                let target_path = filesystem::target_path(
                    &self.config.download_dir,
                    &audio.file_ref.file_id,
                    &audio.suggested_name,
                );
                let format = classify_format(&audio.mime, &audio.suggested_name);
                let record = FileRecord::new_pending(
                    audio.file_ref.file_id.clone(),
                    peer_id.to_string(),
                    message.message_id,
                    audio.declared_size,
                    audio.mime.clone(),
                    format.to_string(),
                    target_path,
                );

                match self.store.upsert_file(&record).await? {
                    UpsertOutcome::Inserted => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        stats.emitted += 1;
                        let task = DownloadTask {
                            record,
                            file_ref: audio.file_ref.clone(),
                            priority: 0,
                        };
                        if tasks_tx.send(task).await.is_err() {
                            return Ok(stats);
                        }
                    }
                    UpsertOutcome::AlreadyExists(existing) => {
                        let reemit = matches!(existing.status, FileStatus::Failed | FileStatus::Skipped)
                            && self.config.force_reemit_failed;
                        if reemit {
                            admitted.fetch_add(1, Ordering::SeqCst);
                            stats.emitted += 1;
                            let task = DownloadTask {
                                record: existing,
                                file_ref: audio.file_ref.clone(),
                                priority: 0,
                            };
                            if tasks_tx.send(task).await.is_err() {
                                return Ok(stats);
                            }
                        } else {
                            stats.skipped_existing += 1;
                        }
                    }
                }
            }

            if reached_cursor || stats.reached_global_limit {
                break;
            }
        }

        if let Some(newest) = newest_seen {
            let advance_to = previous_cursor.map_or(newest, |p| p.max(newest));
            self.store.set_peer_cursor(peer_id, advance_to).await?;
        }

        Ok(stats)
    }
}

/// Classifies a message's audio payload into one of the spec's closed
/// format set, preferring the MIME type and falling back to the file
/// extension in the suggested name.
pub fn classify_format(mime: &str, suggested_name: &str) -> &'static str {
    let mime = mime.to_ascii_lowercase();
    if mime.contains("mpeg") || mime.contains("mp3") {
        return "mp3";
    }
    if mime.contains("flac") {
        return "flac";
    }
    if mime.contains("ogg") {
        return "ogg";
    }
    if mime.contains("mp4") || mime.contains("m4a") || mime.contains("aac") {
        return "m4a";
    }
    if mime.contains("wav") {
        return "wav";
    }
    if mime.contains("opus") {
        return "opus";
    }

    let lower = suggested_name.to_ascii_lowercase();
    for (suffix, format) in [
        (".mp3", "mp3"),
        (".flac", "flac"),
        (".ogg", "ogg"),
        (".m4a", "m4a"),
        (".wav", "wav"),
        (".opus", "opus"),
    ] {
        if lower.ends_with(suffix) {
            return format;
        }
    }

    "other"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AudioInfo, ChunkResult, FileRef, Message, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeHistory {
        /// Pages returned in order, newest-first; each inner Vec is one page.
        pages: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl Transport for FakeHistory {
        async fn fetch_chunk(
            &self,
            _file_ref: &FileRef,
            _offset: u64,
            _length: u64,
        ) -> Result<ChunkResult, TransportError> {
            unimplemented!("enumerator tests don't fetch chunks")
        }

        async fn next_messages(
            &self,
            _peer_id: &str,
            _cursor: Option<i64>,
            _direction: transport::Direction,
            _page_size: u32,
        ) -> Result<Vec<Message>, TransportError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(Vec::new());
            }
            Ok(pages.remove(0))
        }

        async fn refresh_file_ref(
            &self,
            _peer_id: &str,
            _message_id: i64,
        ) -> Result<FileRef, TransportError> {
            unimplemented!()
        }
    }

    fn audio_message(id: i64, file_id: &str) -> Message {
        Message {
            message_id: id,
            audio: Some(AudioInfo {
                file_ref: FileRef {
                    file_id: file_id.into(),
                    access_hash: "h".into(),
                },
                declared_size: 1024,
                mime: "audio/mpeg".into(),
                suggested_name: format!("{file_id}.mp3"),
            }),
        }
    }

    #[tokio::test]
    async fn emits_one_task_per_new_audio_message() {
        let store = Store::open_memory().await.unwrap();
        let transport = FakeHistory {
            pages: Mutex::new(vec![vec![
                audio_message(3, "f3"),
                audio_message(2, "f2"),
                audio_message(1, "f1"),
            ]]),
        };
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let enumerator = Enumerator::new(&store, &transport, &config);
        let (tx, mut rx) = mpsc::channel(16);
        let admitted = AtomicU64::new(0);

        let stats = enumerator.enumerate_peer("peer-1", &admitted, None, &tx).await.unwrap();
        assert_eq!(stats.emitted, 3);
        drop(tx);

        let mut seen = Vec::new();
        while let Some(task) = rx.recv().await {
            seen.push(task.record.file_id);
        }
        assert_eq!(seen.len(), 3);

        let cursor = store.get_peer_cursor("peer-1").await.unwrap().unwrap();
        assert_eq!(cursor.last_scanned_message_id, 3);
    }

    #[tokio::test]
    async fn second_run_with_no_new_messages_emits_nothing() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        {
            let transport = FakeHistory {
                pages: Mutex::new(vec![vec![audio_message(1, "f1")]]),
            };
            let enumerator = Enumerator::new(&store, &transport, &config);
            let (tx, mut rx) = mpsc::channel(16);
            let admitted = AtomicU64::new(0);
            enumerator.enumerate_peer("peer-1", &admitted, None, &tx).await.unwrap();
            drop(tx);
            while rx.recv().await.is_some() {}
        }

        let transport = FakeHistory {
            pages: Mutex::new(vec![vec![audio_message(1, "f1")], vec![]]),
        };
        let enumerator = Enumerator::new(&store, &transport, &config);
        let (tx, mut rx) = mpsc::channel(16);
        let admitted = AtomicU64::new(0);
        let stats = enumerator.enumerate_peer("peer-1", &admitted, None, &tx).await.unwrap();
        assert_eq!(stats.emitted, 0);
        assert_eq!(stats.skipped_existing, 1);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn global_limit_stops_admission_mid_peer() {
        let store = Store::open_memory().await.unwrap();
        let transport = FakeHistory {
            pages: Mutex::new(vec![vec![
                audio_message(3, "f3"),
                audio_message(2, "f2"),
                audio_message(1, "f1"),
            ]]),
        };
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let enumerator = Enumerator::new(&store, &transport, &config);
        let (tx, mut rx) = mpsc::channel(16);
        let admitted = AtomicU64::new(0);

        let stats = enumerator.enumerate_peer("peer-1", &admitted, Some(2), &tx).await.unwrap();
        assert_eq!(stats.emitted, 2);
        assert!(stats.reached_global_limit);
        drop(tx);
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn oldest_first_walks_forward_and_resumes_from_the_cursor() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().to_path_buf(),
            direction: Direction::OldestFirst,
            ..Config::default()
        };

        {
            let transport = FakeHistory {
                pages: Mutex::new(vec![vec![audio_message(1, "f1"), audio_message(2, "f2")]]),
            };
            let enumerator = Enumerator::new(&store, &transport, &config);
            let (tx, mut rx) = mpsc::channel(16);
            let admitted = AtomicU64::new(0);
            let stats = enumerator.enumerate_peer("peer-1", &admitted, None, &tx).await.unwrap();
            assert_eq!(stats.emitted, 2);
            drop(tx);
            while rx.recv().await.is_some() {}
        }

        let cursor = store.get_peer_cursor("peer-1").await.unwrap().unwrap();
        assert_eq!(cursor.last_scanned_message_id, 2);

        // A second, later-arriving page continues climbing from message_id 2
        // rather than re-walking from the start of history.
        let transport = FakeHistory {
            pages: Mutex::new(vec![vec![audio_message(3, "f3")], vec![]]),
        };
        let enumerator = Enumerator::new(&store, &transport, &config);
        let (tx, mut rx) = mpsc::channel(16);
        let admitted = AtomicU64::new(0);
        let stats = enumerator.enumerate_peer("peer-1", &admitted, None, &tx).await.unwrap();
        assert_eq!(stats.emitted, 1);
        drop(tx);
        let mut seen = Vec::new();
        while let Some(task) = rx.recv().await {
            seen.push(task.record.file_id);
        }
        assert_eq!(seen, vec!["f3"]);

        let cursor = store.get_peer_cursor("peer-1").await.unwrap().unwrap();
        assert_eq!(cursor.last_scanned_message_id, 3);
    }

    #[test]
    fn classifies_known_formats_by_mime() {
        assert_eq!(classify_format("audio/mpeg", "x"), "mp3");
        assert_eq!(classify_format("audio/flac", "x"), "flac");
        assert_eq!(classify_format("audio/ogg", "x"), "ogg");
        assert_eq!(classify_format("audio/mp4", "x"), "m4a");
        assert_eq!(classify_format("audio/x-wav", "x"), "wav");
        assert_eq!(classify_format("audio/opus", "x"), "opus");
        assert_eq!(classify_format("application/octet-stream", "song.flac"), "flac");
        assert_eq!(classify_format("application/octet-stream", "song.bin"), "other");
    }
}
