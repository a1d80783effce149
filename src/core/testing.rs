//! In-memory KV transport for tests.
use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tokio::sync::Notify;

use crate::ports::kv_client::{
    KvClient, KvClientError, KvClientResult, KvEntry, KvListResponse, QueryOptions,
};

/// Replays queued list responses in order and records every request.
///
/// When the script runs dry a list call stays pending until another response is
/// pushed, which is how an open long-poll looks to the caller.
#[derive(Default)]
pub struct ScriptedKvClient {
    script: Mutex<VecDeque<KvClientResult<KvListResponse>>>,
    requests: Mutex<Vec<(String, QueryOptions)>>,
    puts: Mutex<Vec<(String, Bytes)>>,
    put_failure: Mutex<Option<StatusCode>>,
    puts_refused: Mutex<bool>,
    pushed: Notify,
}

impl ScriptedKvClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: KvClientResult<KvListResponse>) {
        self.script.lock().unwrap().push_back(response);
        self.pushed.notify_waiters();
    }

    pub fn push_ok(&self, last_index: u64, entries: Vec<KvEntry>) {
        self.push(Ok(KvListResponse {
            status: StatusCode::OK,
            entries,
            last_index,
        }));
    }

    pub fn push_status(&self, status: StatusCode, last_index: u64) {
        self.push(Ok(KvListResponse {
            status,
            entries: Vec::new(),
            last_index,
        }));
    }

    pub fn push_error(&self, error: KvClientError) {
        self.push(Err(error));
    }

    pub fn fail_puts_with(&self, status: StatusCode) {
        *self.put_failure.lock().unwrap() = Some(status);
    }

    /// Answer every write with `false`, as Consul does for a failed CAS.
    pub fn refuse_puts(&self) {
        *self.puts_refused.lock().unwrap() = true;
    }

    pub fn requests(&self) -> Vec<(String, QueryOptions)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn wait_indices(&self) -> Vec<u64> {
        self.requests()
            .into_iter()
            .map(|(_, options)| options.wait_index)
            .collect()
    }

    pub fn puts(&self) -> Vec<(String, Bytes)> {
        self.puts.lock().unwrap().clone()
    }

    /// Wait until at least `count` list requests were made.
    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for requests");
    }
}

#[async_trait]
impl KvClient for ScriptedKvClient {
    async fn list(&self, key: &str, options: QueryOptions) -> KvClientResult<KvListResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((key.to_string(), options));
        loop {
            let pushed = self.pushed.notified();
            let next = self.script.lock().unwrap().pop_front();
            if let Some(response) = next {
                return response;
            }
            pushed.await;
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> KvClientResult<bool> {
        if let Some(status) = *self.put_failure.lock().unwrap() {
            return Err(KvClientError::UnexpectedStatus(status));
        }
        self.puts.lock().unwrap().push((key.to_string(), value));
        Ok(!*self.puts_refused.lock().unwrap())
    }
}
