//! Core engine for concurrent, resumable audio downloads from Telegram.
//!
//! The crate is organized around seven cooperating components: [`store`]
//! persists per-file and per-peer state; [`rate_governor`] admits chunk
//! requests under an adaptive token bucket; [`resume`] validates and extends
//! partial files on disk; [`fetcher`] drives a single file's chunked
//! transfer; [`worker_pool`] runs many fetches concurrently with retry;
//! [`enumerator`] turns a peer's message history into download tasks; and
//! [`coordinator`] wires all of the above into one run.

pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod enumerator;
pub mod error;
pub mod fetcher;
pub mod filesystem;
pub mod logging;
pub mod metadata;
pub mod rate_governor;
pub mod resume;
pub mod retry;
pub mod store;
pub mod transport;
pub mod worker_pool;

pub use config::Config;
pub use coordinator::{Coordinator, RunSummary};
pub use error::CoreError;
pub use store::{FileRecord, FileStatus, Store};
pub use transport::Transport;
