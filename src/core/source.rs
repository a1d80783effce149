//! Registration surface for a Consul configuration source.
//!
//! A [`ConsulConfigurationSource`] carries everything a provider needs: the key,
//! load/reload flags, the parsing strategy and the failure hooks. Hooks return a
//! decision rather than mutating the context they are given.
use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{
        file_snapshot::FileSnapshotStore,
        parsers::{JsonConfigurationParser, SimpleConfigurationParser},
    },
    config::{
        models::{ConsulSourceConfig, ParserKind},
        validation::{SourceConfigValidator, ValidationResult},
    },
    core::provider::ConsulConfigurationProvider,
    error::ConsulConfigError,
    ports::{
        kv_client::KvClient,
        parser::{ConfigurationParser, IdentityRewriter, KeyValueRewriter},
        snapshot_store::SnapshotStore,
    },
};

/// Default poll wait when none is configured.
pub const DEFAULT_POLL_WAIT_TIME: Duration = Duration::from_secs(300);

/// Wait applied after a watch failure when no hook is registered.
pub const DEFAULT_WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What to do with a failure raised during `load()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadDecision {
    #[default]
    Propagate,
    /// Swallow the error; `load()` returns normally with whatever was installed.
    Ignore,
}

/// What the watcher should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchDecision {
    /// Sleep for the given duration, then poll again with the same cursor.
    Retry(Duration),
    /// End the watch; no further reloads happen.
    Stop,
}

/// Describes one failure during `load()`.
pub struct LoadExceptionContext<'a> {
    pub error: &'a ConsulConfigError,
    pub source: &'a ConsulConfigurationSource,
}

/// Describes one failure while watching for changes.
pub struct WatchExceptionContext<'a> {
    pub error: &'a ConsulConfigError,
    /// Failures in a row, including this one.
    pub consecutive_failures: u32,
    pub source: &'a ConsulConfigurationSource,
    /// Cancelling this token ends the watch.
    pub cancellation: &'a CancellationToken,
}

pub type LoadExceptionHandler = Arc<dyn Fn(&LoadExceptionContext<'_>) -> LoadDecision + Send + Sync>;

pub type WatchExceptionHandler =
    Arc<dyn Fn(&WatchExceptionContext<'_>) -> WatchDecision + Send + Sync>;

/// Options and strategies for one Consul-backed configuration source.
#[derive(Clone)]
pub struct ConsulConfigurationSource {
    key: String,
    key_to_remove: Option<String>,
    pub optional: bool,
    pub reload_on_change: bool,
    pub poll_wait_time: Duration,
    pub parser: Arc<dyn ConfigurationParser>,
    pub rewriter: Arc<dyn KeyValueRewriter>,
    pub on_load_exception: Option<LoadExceptionHandler>,
    pub on_watch_exception: Option<WatchExceptionHandler>,
    pub snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl ConsulConfigurationSource {
    /// Create a source for `key` with the defaults: required, no reload,
    /// five minute poll wait, JSON payloads.
    pub fn new(key: impl Into<String>) -> ValidationResult<Self> {
        let key = key.into();
        SourceConfigValidator::validate_key(&key)?;
        Ok(Self {
            key,
            key_to_remove: None,
            optional: false,
            reload_on_change: false,
            poll_wait_time: DEFAULT_POLL_WAIT_TIME,
            parser: Arc::new(JsonConfigurationParser),
            rewriter: Arc::new(IdentityRewriter),
            on_load_exception: None,
            on_watch_exception: None,
            snapshot_store: None,
        })
    }

    /// Build a source from file options. Hooks are attached afterwards.
    pub fn from_config(config: &ConsulSourceConfig) -> ValidationResult<Self> {
        SourceConfigValidator::validate(config)?;
        let mut source = Self::new(config.key.clone())?
            .with_optional(config.optional)
            .with_reload_on_change(config.reload_on_change)
            .with_poll_wait_time(config.poll_wait_time());
        source.key_to_remove = config.key_to_remove.clone();
        source.parser = match config.parser {
            ParserKind::Json => Arc::new(JsonConfigurationParser),
            ParserKind::Simple => Arc::new(SimpleConfigurationParser),
        };
        if let Some(dir) = &config.snapshot_dir {
            source.snapshot_store = Some(Arc::new(FileSnapshotStore::new(dir, &config.key)));
        }
        Ok(source)
    }

    /// Key in the store where the configuration is located.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Portion of entry paths removed to form configuration keys.
    pub fn key_to_remove(&self) -> &str {
        self.key_to_remove.as_deref().unwrap_or(&self.key)
    }

    pub fn with_key_to_remove(mut self, key_to_remove: impl Into<String>) -> Self {
        self.key_to_remove = Some(key_to_remove.into());
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_reload_on_change(mut self, reload_on_change: bool) -> Self {
        self.reload_on_change = reload_on_change;
        self
    }

    pub fn with_poll_wait_time(mut self, poll_wait_time: Duration) -> Self {
        self.poll_wait_time = poll_wait_time;
        self
    }

    pub fn with_parser(mut self, parser: impl ConfigurationParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_rewriter(mut self, rewriter: impl KeyValueRewriter) -> Self {
        self.rewriter = Arc::new(rewriter);
        self
    }

    pub fn with_snapshot_store(mut self, store: impl SnapshotStore) -> Self {
        self.snapshot_store = Some(Arc::new(store));
        self
    }

    pub fn on_load_exception<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LoadExceptionContext<'_>) -> LoadDecision + Send + Sync + 'static,
    {
        self.on_load_exception = Some(Arc::new(handler));
        self
    }

    pub fn on_watch_exception<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WatchExceptionContext<'_>) -> WatchDecision + Send + Sync + 'static,
    {
        self.on_watch_exception = Some(Arc::new(handler));
        self
    }

    /// Create the provider for this source over the given transport.
    pub fn build(self, client: Arc<dyn KvClient>) -> ConsulConfigurationProvider {
        ConsulConfigurationProvider::new(self, client)
    }
}

impl fmt::Debug for ConsulConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsulConfigurationSource")
            .field("key", &self.key)
            .field("key_to_remove", &self.key_to_remove())
            .field("optional", &self.optional)
            .field("reload_on_change", &self.reload_on_change)
            .field("poll_wait_time", &self.poll_wait_time)
            .field("has_load_hook", &self.on_load_exception.is_some())
            .field("has_watch_hook", &self.on_watch_exception.is_some())
            .field("has_snapshot_store", &self.snapshot_store.is_some())
            .finish()
    }
}
