//! Load/reload coordination for one Consul source.
//!
//! The provider performs the initial load, installs the flattened mapping into an
//! [`ArcSwapOption`] and, when reloading is enabled, drives a background
//! [`ChangeWatcher`]. Readers always see either the previous mapping or the new
//! one; every successful reload bumps a generation on a `watch` channel.
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    core::{
        fetcher::{ConfigFetcher, ConfigQueryResult},
        flattener::{ConfigData, flatten_entries},
        source::{ConsulConfigurationSource, LoadDecision, LoadExceptionContext},
        watcher::{Backoff, ChangeWatcher, WatchOutcome, next_cursor},
    },
    error::{ConsulConfigError, ConsulConfigResult},
    ports::{config_provider::ConfigurationProvider, kv_client::KvClient},
    tracing_setup::configure_component_tracing,
};

/// How long `shutdown` waits for the watch task to finish.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct ProviderState {
    source: Arc<ConsulConfigurationSource>,
    fetcher: ConfigFetcher,
    data: ArcSwapOption<ConfigData>,
    last_index: Arc<AtomicU64>,
    reload_tx: watch::Sender<u64>,
}

/// Configuration provider backed by a Consul key.
pub struct ConsulConfigurationProvider {
    state: Arc<ProviderState>,
    cancel: CancellationToken,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsulConfigurationProvider {
    pub fn new(source: ConsulConfigurationSource, client: Arc<dyn KvClient>) -> Self {
        let (reload_tx, _) = watch::channel(0);
        Self {
            state: Arc::new(ProviderState {
                source: Arc::new(source),
                fetcher: ConfigFetcher::new(client),
                data: ArcSwapOption::empty(),
                last_index: Arc::new(AtomicU64::new(0)),
                reload_tx,
            }),
            cancel: CancellationToken::new(),
            watch_task: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &ConsulConfigurationSource {
        &self.state.source
    }

    /// Fetch, flatten and install the configuration.
    ///
    /// Does nothing while a watch started by an earlier load is still running.
    /// Failures go through the source's load hook, which may ignore them.
    pub async fn load(&self) -> ConsulConfigResult<()> {
        if self.is_watching() {
            tracing::debug!(key = self.source().key(), "Watch already running, skipping load");
            return Ok(());
        }

        match self.state.load_current(&self.cancel).await {
            Ok(index) => {
                if self.source().reload_on_change {
                    self.start_watching(index);
                }
                Ok(())
            }
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) => self.handle_load_error(error).await,
        }
    }

    async fn handle_load_error(&self, mut error: ConsulConfigError) -> ConsulConfigResult<()> {
        if self.state.data.load().is_none() {
            if let Err(restore_error) = self.state.restore_snapshot().await {
                tracing::warn!(
                    key = self.source().key(),
                    error = %restore_error,
                    "Failed to restore configuration snapshot"
                );
                error = restore_error;
            }
        }

        let decision = match &self.source().on_load_exception {
            Some(handler) => handler(&LoadExceptionContext {
                error: &error,
                source: self.source(),
            }),
            None => LoadDecision::Propagate,
        };

        match decision {
            LoadDecision::Ignore => {
                tracing::warn!(key = self.source().key(), error = %error, "Ignoring Consul load failure");
                Ok(())
            }
            LoadDecision::Propagate => {
                tracing::error!(key = self.source().key(), error = %error, "Failed to load configuration from Consul");
                Err(error)
            }
        }
    }

    fn start_watching(&self, initial_index: u64) {
        let mut guard = self.watch_task.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let watcher = ChangeWatcher::new(
            self.state.source.clone(),
            self.state.fetcher.clone(),
            initial_index,
        )
        .with_index_publisher(self.state.last_index.clone());
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let span = configure_component_tracing("consul_watch");

        tracing::info!(key = self.source().key(), index = initial_index, "Starting Consul watch");
        *guard = Some(tokio::spawn(
            async move { state.run_watch(watcher, cancel).await }.instrument(span),
        ));
    }

    /// Write `value` under the source key and refresh the installed data.
    ///
    /// Returns whether Consul accepted the write; a rejected write leaves the
    /// installed data alone. With a running watch the change arrives through the
    /// long poll; otherwise the key is read back immediately.
    pub async fn set(
        &self,
        relative_key: &str,
        value: impl Into<Bytes>,
    ) -> ConsulConfigResult<bool> {
        let key = self.source().key().trim_end_matches('/');
        let relative_key = relative_key.trim_start_matches('/');
        let path = if relative_key.is_empty() {
            key.to_string()
        } else {
            format!("{key}/{relative_key}")
        };

        if !self.state.fetcher.put(&path, value.into()).await? {
            tracing::warn!(key = %path, "Consul rejected the write");
            return Ok(false);
        }

        if !self.is_watching() {
            let result = self
                .state
                .fetcher
                .get(self.source().key(), 0, self.source().poll_wait_time, &self.cancel)
                .await?;
            self.state.record_index(result.last_index);
            self.state.apply_reload(&result).await?;
        }
        Ok(true)
    }

    /// Case-insensitive lookup in the installed mapping.
    pub fn try_get(&self, key: &str) -> Option<String> {
        let data = self.state.data.load();
        data.as_deref()
            .and_then(|data| data.get(key))
            .map(str::to_string)
    }

    pub fn data(&self) -> Option<Arc<ConfigData>> {
        self.state.data.load_full()
    }

    /// Last version index recorded by the initial load or the watch.
    pub fn last_index(&self) -> u64 {
        self.state.last_index.load(Ordering::Acquire)
    }

    pub fn is_watching(&self) -> bool {
        self.watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Receiver that observes a new generation after every reload.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.reload_tx.subscribe()
    }

    /// Cancel the watch and wait briefly for it to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .watch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => tracing::info!(key = self.source().key(), "Consul watch stopped"),
            Ok(Err(e)) => tracing::error!(key = self.source().key(), error = %e, "Consul watch task failed"),
            Err(_) => tracing::warn!(
                key = self.source().key(),
                "Consul watch did not stop within {:?}",
                SHUTDOWN_TIMEOUT
            ),
        }
    }
}

impl Drop for ConsulConfigurationProvider {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ProviderState {
    fn record_index(&self, observed: u64) {
        let recorded = self.last_index.load(Ordering::Acquire);
        self.last_index
            .store(next_cursor(recorded, observed), Ordering::Release);
    }

    /// Initial "get now" read. Returns the raw index the store reported.
    async fn load_current(&self, cancel: &CancellationToken) -> ConsulConfigResult<u64> {
        let key = self.source.key();
        let result = self
            .fetcher
            .get(key, 0, self.source.poll_wait_time, cancel)
            .await?;
        self.record_index(result.last_index);

        if !result.has_value() && !self.source.optional {
            return Err(ConsulConfigError::NotFound {
                key: key.to_string(),
            });
        }

        self.install(&result).await?;
        tracing::info!(
            key,
            index = result.last_index,
            "Loaded configuration from Consul"
        );
        Ok(result.last_index)
    }

    async fn install(&self, result: &ConfigQueryResult) -> ConsulConfigResult<()> {
        let data = flatten_entries(
            &result.entries,
            self.source.key_to_remove(),
            self.source.parser.as_ref(),
            self.source.rewriter.as_ref(),
        )?;
        tracing::debug!(key = self.source.key(), keys = data.len(), "Installing configuration");
        self.data.store(Some(Arc::new(data)));

        if let Some(store) = &self.source.snapshot_store {
            if let Err(e) = store.save(&result.entries, self.source.key_to_remove()).await {
                tracing::warn!(key = self.source.key(), error = %e, "Failed to save configuration snapshot");
            }
        }
        Ok(())
    }

    /// Install the last persisted entries, if any.
    async fn restore_snapshot(&self) -> ConsulConfigResult<()> {
        let Some(store) = &self.source.snapshot_store else {
            return Ok(());
        };
        let entries = store.restore().await?;
        if entries.is_empty() {
            return Ok(());
        }

        // Snapshot entries are already relative to the source key.
        let data = flatten_entries(
            &entries,
            "",
            self.source.parser.as_ref(),
            self.source.rewriter.as_ref(),
        )?;
        tracing::info!(
            key = self.source.key(),
            keys = data.len(),
            "Restored configuration from snapshot"
        );
        self.data.store(Some(Arc::new(data)));
        Ok(())
    }

    /// Install a read observed after the initial load and notify subscribers.
    ///
    /// A required key that went missing keeps the previous data.
    async fn apply_reload(&self, result: &ConfigQueryResult) -> ConsulConfigResult<()> {
        if !result.has_value() && !self.source.optional {
            tracing::info!(
                key = self.source.key(),
                index = result.last_index,
                "Consul key missing, keeping previous configuration"
            );
            return Ok(());
        }

        self.install(result).await?;
        self.reload_tx.send_modify(|generation| *generation += 1);
        tracing::info!(
            key = self.source.key(),
            index = result.last_index,
            "Reloaded configuration from Consul"
        );
        Ok(())
    }

    async fn run_watch(self: Arc<Self>, mut watcher: ChangeWatcher, cancel: CancellationToken) {
        loop {
            match watcher.watch(&cancel).await {
                WatchOutcome::Changed(result) => {
                    if let Err(error) = self.apply_reload(&result).await {
                        match watcher.handle_failure(error, &cancel).await {
                            Backoff::Resume => {}
                            Backoff::Stopped | Backoff::Cancelled => break,
                        }
                    }
                }
                WatchOutcome::Cancelled => {
                    tracing::debug!(key = self.source.key(), "Consul watch cancelled");
                    break;
                }
                WatchOutcome::Stopped => break,
            }
        }
        tracing::info!(key = self.source.key(), "Consul watch task is shutting down.");
    }
}

#[async_trait]
impl ConfigurationProvider for ConsulConfigurationProvider {
    async fn load(&self) -> ConsulConfigResult<()> {
        ConsulConfigurationProvider::load(self).await
    }

    fn try_get(&self, key: &str) -> Option<String> {
        ConsulConfigurationProvider::try_get(self, key)
    }

    fn data(&self) -> Option<Arc<ConfigData>> {
        ConsulConfigurationProvider::data(self)
    }

    fn reload_token(&self) -> watch::Receiver<u64> {
        self.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use http::StatusCode;

    use super::*;
    use crate::{
        adapters::{file_snapshot::FileSnapshotStore, parsers::SimpleConfigurationParser},
        core::{source::WatchDecision, testing::ScriptedKvClient},
        error::{FetchError, FlattenError},
        ports::kv_client::{KvClientError, KvEntry, QueryOptions},
    };

    fn source(key: &str) -> ConsulConfigurationSource {
        ConsulConfigurationSource::new(key)
            .unwrap()
            .with_poll_wait_time(Duration::from_secs(1))
    }

    async fn wait_for_generation(rx: &mut watch::Receiver<u64>, generation: u64) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|g| *g >= generation))
            .await
            .expect("timed out waiting for reload")
            .unwrap();
    }

    #[tokio::test]
    async fn test_required_missing_key_fails_with_key_in_message() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_status(StatusCode::NOT_FOUND, 1);
        let provider = source("app/db").build(client);

        let error = provider.load().await.unwrap_err();
        assert!(matches!(error, ConsulConfigError::NotFound { .. }));
        assert!(error.to_string().contains("app/db"));
        assert!(provider.data().is_none());
    }

    #[tokio::test]
    async fn test_optional_missing_key_installs_empty_mapping() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_status(StatusCode::NOT_FOUND, 1);
        let provider = source("app/db").with_optional(true).build(client);

        provider.load().await.unwrap();
        assert!(provider.data().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_installs_flattened_mapping() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(4, vec![KvEntry::new("app/db", r#"{"host":"x"}"#)]);
        let provider = source("app/db").build(client.clone());

        provider.load().await.unwrap();
        assert_eq!(provider.try_get("host").as_deref(), Some("x"));
        assert_eq!(provider.try_get("HOST").as_deref(), Some("x"));
        assert_eq!(provider.last_index(), 4);
        assert!(!provider.is_watching());
        assert_eq!(client.requests(), vec![("app/db".to_string(), QueryOptions::now())]);
    }

    #[tokio::test]
    async fn test_load_hook_can_ignore_failure() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_status(StatusCode::INTERNAL_SERVER_ERROR, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_hook = seen.clone();
        let provider = source("app")
            .on_load_exception(move |context| {
                seen_in_hook
                    .lock()
                    .unwrap()
                    .push((context.error.to_string(), context.source.key().to_string()));
                LoadDecision::Ignore
            })
            .build(client);

        provider.load().await.unwrap();
        assert!(provider.data().is_none());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.contains("500"));
        assert_eq!(seen[0].1, "app");
    }

    #[tokio::test]
    async fn test_format_error_reaches_load_hook() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", "{not json")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_hook = calls.clone();
        let provider = source("app")
            .on_load_exception(move |context| {
                assert!(matches!(context.error, ConsulConfigError::Format(FlattenError::Parse(_))));
                calls_in_hook.fetch_add(1, Ordering::SeqCst);
                LoadDecision::Propagate
            })
            .build(client);

        assert!(provider.load().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_installs_new_value_and_signals_once() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        client.push_ok(2, vec![KvEntry::new("app", r#"{"v":"B"}"#)]);
        let provider = source("app").with_reload_on_change(true).build(client.clone());
        let mut rx = provider.subscribe();

        provider.load().await.unwrap();
        wait_for_generation(&mut rx, 1).await;
        assert_eq!(provider.try_get("v").as_deref(), Some("B"));

        // The watch is now parked on the next long poll.
        client.wait_for_requests(3).await;
        assert_eq!(*rx.borrow_and_update(), 1);
        assert_eq!(client.wait_indices(), vec![0, 1, 2]);
        assert_eq!(provider.last_index(), 2);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_missing_key_keeps_data() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        client.push_status(StatusCode::NOT_FOUND, 2);
        let provider = source("app").with_reload_on_change(true).build(client.clone());
        let rx = provider.subscribe();

        provider.load().await.unwrap();
        client.wait_for_requests(3).await;
        assert_eq!(provider.try_get("v").as_deref(), Some("A"));
        assert_eq!(*rx.borrow(), 0);
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_optional_key_removed_in_background_empties_mapping() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        client.push_status(StatusCode::NOT_FOUND, 2);
        let provider = source("app")
            .with_optional(true)
            .with_reload_on_change(true)
            .build(client);
        let mut rx = provider.subscribe();

        provider.load().await.unwrap();
        wait_for_generation(&mut rx, 1).await;
        assert!(provider.data().unwrap().is_empty());
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_load_is_noop_while_watching() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        let provider = source("app").with_reload_on_change(true).build(client.clone());

        provider.load().await.unwrap();
        client.wait_for_requests(2).await;
        provider.load().await.unwrap();
        assert_eq!(client.requests().len(), 2);
        assert!(provider.is_watching());
        provider.shutdown().await;
        assert!(!provider.is_watching());
    }

    #[tokio::test]
    async fn test_reload_format_error_goes_to_watch_hook() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        client.push_ok(2, vec![KvEntry::new("app", "{broken")]);
        let failures = Arc::new(AtomicUsize::new(0));
        let failures_in_hook = failures.clone();
        let provider = source("app")
            .with_reload_on_change(true)
            .on_watch_exception(move |context| {
                assert!(matches!(context.error, ConsulConfigError::Format(_)));
                failures_in_hook.fetch_add(1, Ordering::SeqCst);
                WatchDecision::Stop
            })
            .build(client);

        provider.load().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while provider.is_watching() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(provider.try_get("v").as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_snapshot_restored_when_store_unreachable() {
        let dir = tempfile::tempdir().unwrap();

        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app/db", r#"{"host":"x"}"#)]);
        let provider = source("app")
            .with_snapshot_store(FileSnapshotStore::new(dir.path(), "app"))
            .build(client);
        provider.load().await.unwrap();
        assert_eq!(provider.try_get("db:host").as_deref(), Some("x"));

        let offline = Arc::new(ScriptedKvClient::new());
        offline.push_error(KvClientError::ConnectionError("refused".to_string()));
        let provider = source("app")
            .with_snapshot_store(FileSnapshotStore::new(dir.path(), "app"))
            .on_load_exception(|context| {
                assert!(matches!(
                    context.error,
                    ConsulConfigError::Fetch(FetchError::Transport(_))
                ));
                LoadDecision::Ignore
            })
            .build(offline);
        provider.load().await.unwrap();
        assert_eq!(provider.try_get("db:host").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_set_writes_under_key_and_reloads() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_status(StatusCode::NOT_FOUND, 1);
        client.push_ok(2, vec![KvEntry::new("app/greeting", "hello")]);
        let provider = source("app")
            .with_optional(true)
            .with_parser(SimpleConfigurationParser)
            .build(client.clone());
        let rx = provider.subscribe();

        provider.load().await.unwrap();
        assert!(provider.set("greeting", "hello").await.unwrap());

        assert_eq!(
            client.puts(),
            vec![("app/greeting".to_string(), Bytes::from_static(b"hello"))]
        );
        assert_eq!(provider.try_get("greeting").as_deref(), Some("hello"));
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(provider.last_index(), 2);
    }

    #[tokio::test]
    async fn test_set_surfaces_rejected_write() {
        let client = Arc::new(ScriptedKvClient::new());
        client.fail_puts_with(StatusCode::FORBIDDEN);
        let provider = source("app").build(client);

        let error = provider.set("a", "1").await.unwrap_err();
        assert!(matches!(
            error,
            ConsulConfigError::Fetch(FetchError::Protocol {
                status: StatusCode::FORBIDDEN
            })
        ));
    }

    #[tokio::test]
    async fn test_load_after_shutdown_is_cancelled() {
        let client = Arc::new(ScriptedKvClient::new());
        let provider = source("app").build(client.clone());
        provider.shutdown().await;

        let error = provider.load().await.unwrap_err();
        assert!(error.is_cancelled());
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_set_reports_unaccepted_write() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_ok(1, vec![KvEntry::new("app", r#"{"v":"A"}"#)]);
        client.refuse_puts();
        let provider = source("app").build(client.clone());
        let rx = provider.subscribe();

        provider.load().await.unwrap();
        assert!(!provider.set("v", "B").await.unwrap());
        assert_eq!(client.requests().len(), 1);
        assert_eq!(provider.try_get("v").as_deref(), Some("A"));
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test]
    async fn test_required_missing_key_goes_through_load_hook() {
        let client = Arc::new(ScriptedKvClient::new());
        client.push_status(StatusCode::NOT_FOUND, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_hook = calls.clone();
        let provider = source("app/db")
            .on_load_exception(move |context| {
                assert!(matches!(
                    context.error,
                    ConsulConfigError::NotFound { key } if key == "app/db"
                ));
                calls_in_hook.fetch_add(1, Ordering::SeqCst);
                LoadDecision::Ignore
            })
            .build(client);

        provider.load().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(provider.data().is_none());
        assert!(!provider.is_watching());
    }
}
