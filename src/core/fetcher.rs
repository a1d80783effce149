use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{FetchError, FetchResult},
    ports::kv_client::{KvClient, KvClientError, KvEntry, QueryOptions},
};

/// Outcome of a read that the store answered normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Found,
    NotFound,
}

/// Uniform result of a single read: status, entries and version index.
#[derive(Debug, Clone)]
pub struct ConfigQueryResult {
    pub status: QueryStatus,
    pub entries: Vec<KvEntry>,
    pub last_index: u64,
}

impl ConfigQueryResult {
    /// True when the read found at least one valued leaf.
    pub fn has_value(&self) -> bool {
        self.status == QueryStatus::Found && self.entries.iter().any(KvEntry::has_value)
    }
}

/// Thin wrapper over the transport that triages statuses.
///
/// "Not found" is a valid empty result; any other non-success status is a
/// protocol failure. Nothing here retries.
#[derive(Clone)]
pub struct ConfigFetcher {
    client: Arc<dyn KvClient>,
}

impl ConfigFetcher {
    pub fn new(client: Arc<dyn KvClient>) -> Self {
        Self { client }
    }

    /// Read `key` now (`wait_index == 0`) or block until its index passes
    /// `wait_index` or `wait_time` elapses.
    pub async fn get(
        &self,
        key: &str,
        wait_index: u64,
        wait_time: Duration,
        cancel: &CancellationToken,
    ) -> FetchResult<ConfigQueryResult> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let options = if wait_index == 0 {
            QueryOptions::now()
        } else {
            QueryOptions::blocking(wait_index, wait_time)
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.client.list(key, options) => response?,
        };

        match response.status {
            StatusCode::OK => Ok(ConfigQueryResult {
                status: QueryStatus::Found,
                entries: response.entries,
                last_index: response.last_index,
            }),
            StatusCode::NOT_FOUND => Ok(ConfigQueryResult {
                status: QueryStatus::NotFound,
                entries: Vec::new(),
                last_index: response.last_index,
            }),
            status => Err(FetchError::Protocol { status }),
        }
    }

    /// Upsert the raw value at `key`.
    pub async fn put(&self, key: &str, value: Bytes) -> FetchResult<bool> {
        self.client.put(key, value).await.map_err(|e| match e {
            KvClientError::UnexpectedStatus(status) => FetchError::Protocol { status },
            other => FetchError::Transport(other),
        })
    }
}
