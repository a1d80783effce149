use async_trait::async_trait;
use thiserror::Error;

use crate::ports::kv_client::KvEntry;

/// Error type for snapshot persistence
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SnapshotError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when a snapshot path would leave the snapshot directory
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// SnapshotStore defines the port for keeping a local copy of the last good entries
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Persist the leaf entries of a successful read.
    ///
    /// # Arguments
    /// * `entries` - Entries as returned by the store
    /// * `key_to_remove` - Prefix stripped from entry paths to name the files
    async fn save(&self, entries: &[KvEntry], key_to_remove: &str) -> SnapshotResult<()>;

    /// Read back previously persisted entries, keyed relative to the source key.
    ///
    /// Returns an empty list when nothing was persisted.
    async fn restore(&self) -> SnapshotResult<Vec<KvEntry>>;
}
