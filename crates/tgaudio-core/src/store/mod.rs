//! Persistent state for files and peer scan cursors.

mod db;
mod types;

pub use db::Store;
pub use types::{
    ClaimOutcome, FailureRecord, FileRecord, FileStatus, PeerCursor, StoreError, UpsertOutcome,
};
