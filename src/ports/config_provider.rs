use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{core::flattener::ConfigData, error::ConsulConfigResult};

/// Contract between a configuration source and the host composition framework.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    /// Load the current configuration, installing it for subsequent lookups.
    async fn load(&self) -> ConsulConfigResult<()>;

    /// Look up a flattened key, ignoring case.
    fn try_get(&self, key: &str) -> Option<String>;

    /// Snapshot of the installed mapping, absent until the first load.
    fn data(&self) -> Option<Arc<ConfigData>>;

    /// Return a receiver that observes a new generation after every reload.
    fn reload_token(&self) -> watch::Receiver<u64>;
}
