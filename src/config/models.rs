//! Option types for a Consul configuration source.
//!
//! These map directly to TOML (also JSON / YAML) files loaded by [`super::loader`] and
//! include defaults so that a minimal file only names the key.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

fn default_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_poll_wait_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Payload format stored under the key
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Each leaf of a JSON document becomes one key
    #[default]
    Json,
    /// The whole payload is one value named after its path
    Simple,
}

/// Options for one Consul configuration source
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsulSourceConfig {
    /// Base URL of the Consul HTTP API
    #[serde(default = "default_address")]
    pub address: String,
    /// ACL token sent with every request
    #[serde(default)]
    pub token: Option<String>,
    /// Datacenter to query; the agent's own when unset
    #[serde(default)]
    pub datacenter: Option<String>,
    /// Key (or key prefix) holding the configuration
    pub key: String,
    /// Prefix stripped from entry paths; defaults to `key`
    #[serde(default)]
    pub key_to_remove: Option<String>,
    /// Whether a missing key at startup is tolerated
    #[serde(default)]
    pub optional: bool,
    /// Whether to long-poll for changes after the first load
    #[serde(default)]
    pub reload_on_change: bool,
    /// Maximum time a blocking query is held open by the server
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,
    /// Timeout for non-blocking requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub parser: ParserKind,
    /// Directory for the local copy of the last good entries
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

impl ConsulSourceConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            address: default_address(),
            token: None,
            datacenter: None,
            key: key.into(),
            key_to_remove: None,
            optional: false,
            reload_on_change: false,
            poll_wait_secs: default_poll_wait_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            parser: ParserKind::default(),
            snapshot_dir: None,
        }
    }

    pub fn poll_wait_time(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
