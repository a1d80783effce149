//! Long-poll change detection.
//!
//! A [`ChangeWatcher`] owns the version-index cursor. Each call to
//! [`ChangeWatcher::watch`] issues blocking reads until the index moves past the
//! cursor, then hands the fresh result back; it never touches installed data.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        fetcher::{ConfigFetcher, ConfigQueryResult},
        source::{
            ConsulConfigurationSource, DEFAULT_WATCH_RETRY_DELAY, WatchDecision,
            WatchExceptionContext,
        },
    },
    error::{ConsulConfigError, FetchError},
};

/// Result of one watch cycle.
#[derive(Debug)]
pub enum WatchOutcome {
    /// The index advanced; carries the read that observed it.
    Changed(ConfigQueryResult),
    /// The shared cancellation token fired.
    Cancelled,
    /// The failure policy asked to stop watching.
    Stopped,
}

/// What happened after a failure was handed to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Resume,
    Stopped,
    Cancelled,
}

/// Cursor to use after the store reports `observed`, given the `recorded` one.
///
/// A zero index becomes 1 and any regression resets to 0, so the next read is a
/// non-blocking "get now" instead of waiting on an index the store will not
/// produce again.
pub fn next_cursor(recorded: u64, observed: u64) -> u64 {
    if observed == 0 {
        1
    } else if observed < recorded {
        0
    } else {
        observed
    }
}

pub struct ChangeWatcher {
    source: Arc<ConsulConfigurationSource>,
    fetcher: ConfigFetcher,
    cursor: u64,
    consecutive_failures: u32,
    published_index: Arc<AtomicU64>,
}

impl ChangeWatcher {
    /// Start from the raw index observed by the initial load.
    pub fn new(
        source: Arc<ConsulConfigurationSource>,
        fetcher: ConfigFetcher,
        initial_index: u64,
    ) -> Self {
        let cursor = next_cursor(0, initial_index);
        Self {
            source,
            fetcher,
            cursor,
            consecutive_failures: 0,
            published_index: Arc::new(AtomicU64::new(cursor)),
        }
    }

    /// Mirror every recorded cursor into `published` for lock-free readers.
    pub fn with_index_publisher(mut self, published: Arc<AtomicU64>) -> Self {
        published.store(self.cursor, Ordering::Release);
        self.published_index = published;
        self
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record `observed` and report whether it is past the previous cursor.
    fn record_index(&mut self, observed: u64) -> bool {
        let previous = self.cursor;
        self.cursor = next_cursor(previous, observed);
        self.published_index.store(self.cursor, Ordering::Release);
        if self.cursor != observed {
            tracing::info!(
                key = self.source.key(),
                previous,
                observed,
                cursor = self.cursor,
                "Consul index reset, adjusting cursor"
            );
        }
        observed > previous
    }

    /// Poll until a change is seen, the policy stops the watch, or `cancel` fires.
    pub async fn watch(&mut self, cancel: &CancellationToken) -> WatchOutcome {
        let key = self.source.key().to_string();
        loop {
            if cancel.is_cancelled() {
                return WatchOutcome::Cancelled;
            }

            match self
                .fetcher
                .get(&key, self.cursor, self.source.poll_wait_time, cancel)
                .await
            {
                Ok(result) => {
                    self.consecutive_failures = 0;
                    if self.record_index(result.last_index) {
                        tracing::info!(key = %key, index = result.last_index, "Consul key changed");
                        return WatchOutcome::Changed(result);
                    }
                    tracing::debug!(key = %key, index = result.last_index, "Long poll returned unchanged");
                }
                Err(FetchError::Cancelled) => return WatchOutcome::Cancelled,
                Err(error) => match self.handle_failure(error.into(), cancel).await {
                    Backoff::Resume => {}
                    Backoff::Stopped => return WatchOutcome::Stopped,
                    Backoff::Cancelled => return WatchOutcome::Cancelled,
                },
            }
        }
    }

    /// Count a failure, ask the policy what to do, and sleep if told to retry.
    ///
    /// The cursor is left where it was, so the next read repeats the failed one.
    pub async fn handle_failure(
        &mut self,
        error: ConsulConfigError,
        cancel: &CancellationToken,
    ) -> Backoff {
        if error.is_cancelled() || cancel.is_cancelled() {
            return Backoff::Cancelled;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let decision = match &self.source.on_watch_exception {
            Some(handler) => handler(&WatchExceptionContext {
                error: &error,
                consecutive_failures: self.consecutive_failures,
                source: self.source.as_ref(),
                cancellation: cancel,
            }),
            None => WatchDecision::Retry(DEFAULT_WATCH_RETRY_DELAY),
        };

        match decision {
            WatchDecision::Stop => {
                tracing::warn!(
                    key = self.source.key(),
                    consecutive_failures = self.consecutive_failures,
                    error = %error,
                    "Stopping Consul watch"
                );
                Backoff::Stopped
            }
            WatchDecision::Retry(wait) => {
                tracing::warn!(
                    key = self.source.key(),
                    consecutive_failures = self.consecutive_failures,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "Consul watch failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Backoff::Cancelled,
                    _ = tokio::time::sleep(wait) => Backoff::Resume,
                }
            }
        }
    }
}
