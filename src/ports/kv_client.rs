use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;

/// Custom error type for KV transport operations
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum KvClientError {
    /// Error when the connection to the store fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the request times out
    #[error("Timeout error after {0} ms")]
    Timeout(u128),

    /// Error when the request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error when the response body cannot be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Error when a write is answered with a non-success status
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(StatusCode),
}

/// Result type alias for KV transport operations
pub type KvClientResult<T> = Result<T, KvClientError>;

/// Options for a single list request.
///
/// A `wait_index` of zero asks for the current data without blocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub wait_index: u64,
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    /// Non-blocking "get now" read.
    pub fn now() -> Self {
        Self::default()
    }

    /// Blocking read that returns once the index moves past `wait_index`
    /// or `wait_time` elapses.
    pub fn blocking(wait_index: u64, wait_time: Duration) -> Self {
        Self {
            wait_index,
            wait_time: Some(wait_time),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.wait_index > 0
    }
}

/// One entry returned by a recursive read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Full store path of the entry.
    pub key: String,
    /// Raw payload; folders carry none.
    pub value: Option<Bytes>,
}

impl KvEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// Folder entries end with the store delimiter.
    pub fn is_leaf(&self) -> bool {
        !self.key.ends_with('/')
    }

    /// An entry contributes data iff it is a leaf with a non-empty payload.
    pub fn has_value(&self) -> bool {
        self.is_leaf() && self.value.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Raw transport response: status, entries and the store's version index.
#[derive(Debug, Clone)]
pub struct KvListResponse {
    pub status: StatusCode,
    pub entries: Vec<KvEntry>,
    pub last_index: u64,
}

/// KvClient defines the port (interface) to the remote key-value store
#[async_trait]
pub trait KvClient: Send + Sync + 'static {
    /// Read every entry at or below `key`.
    ///
    /// Non-success statuses are returned as-is; only network faults are errors.
    async fn list(&self, key: &str, options: QueryOptions) -> KvClientResult<KvListResponse>;

    /// Upsert the raw bytes stored at `key`.
    async fn put(&self, key: &str, value: Bytes) -> KvClientResult<bool>;
}
