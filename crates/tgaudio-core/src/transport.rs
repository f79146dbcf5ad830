//! The Transport contract: everything the engine needs from a Telegram
//! client, expressed as a trait so the core never depends on a concrete
//! MTProto implementation.

use async_trait::async_trait;
use std::fmt;

/// Opaque handle to a remote audio payload, supplied by a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub file_id: String,
    /// Transport-internal reference blob that may expire; refreshed by
    /// re-fetching the owning message when [`TransportError::FileReferenceExpired`]
    /// is raised.
    pub access_hash: String,
}

/// One page of bytes returned by [`Transport::fetch_chunk`].
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub bytes: Vec<u8>,
    pub is_last: bool,
    /// The remote-reported total size, if newly observed in this response.
    pub observed_size: Option<u64>,
}

/// Audio payload metadata carried by a message.
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub file_ref: FileRef,
    pub declared_size: u64,
    pub mime: String,
    pub suggested_name: String,
}

/// One message in a peer's history.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub audio: Option<AudioInfo>,
}

/// Direction to walk a peer's message history, mirrored from
/// [`crate::config::Direction`] at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    NewestFirst,
    OldestFirst,
}

/// Errors the transport can signal back to the engine.
#[derive(Debug)]
pub enum TransportError {
    /// Server asked the client to back off for this many seconds.
    FloodWait(u64),
    /// Session is invalid or was revoked.
    Unauthorized,
    /// The file reference has expired and must be refreshed.
    FileReferenceExpired,
    /// Any other transport-level failure (timeout, connection reset, ...).
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::FloodWait(secs) => write!(f, "flood wait: {secs}s"),
            TransportError::Unauthorized => write!(f, "unauthorized"),
            TransportError::FileReferenceExpired => write!(f, "file reference expired"),
            TransportError::Other(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The subset of a Telegram client the engine depends on.
///
/// A production binary wires this to a real MTProto client; tests use an
/// in-memory double (see the `fetcher` and `enumerator` test modules).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches `length` bytes starting at `offset` from the given file.
    async fn fetch_chunk(
        &self,
        file_ref: &FileRef,
        offset: u64,
        length: u64,
    ) -> Result<ChunkResult, TransportError>;

    /// Streams one page of messages for `peer_id`, starting strictly after
    /// (or before, depending on `direction`) `cursor`. Returns an empty page
    /// to signal the peer is exhausted.
    async fn next_messages(
        &self,
        peer_id: &str,
        cursor: Option<i64>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, TransportError>;

    /// Re-fetches a message to obtain a fresh [`FileRef`] after
    /// [`TransportError::FileReferenceExpired`].
    async fn refresh_file_ref(
        &self,
        peer_id: &str,
        message_id: i64,
    ) -> Result<FileRef, TransportError>;
}
