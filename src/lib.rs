//! consul-config - Consul KV as a layered configuration source.
//!
//! The crate reads a key (or a whole key prefix) from Consul's KV store, flattens the stored
//! payloads into case-insensitive `section:sub:key` pairs and keeps them current by
//! long-polling the key with Consul blocking queries. It follows a **hexagonal architecture**:
//! the transport, payload parsing and local snapshots sit behind traits so they can be swapped
//! or faked in tests.
//!
//! # Features
//! - Recursive reads with folder handling and prefix stripping (`key_to_remove`)
//! - JSON documents flattened into `a:b:0:c` keys, or whole payloads as single values
//! - Background reload on change with a monotonic version-index cursor
//! - Load and watch failure hooks that decide whether to propagate, retry or stop
//! - Optional on-disk snapshot of the last good entries, used when Consul is unreachable
//! - Structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use consul_config::{ConsulConfigurationSource, ConsulHttpClient};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let client = Arc::new(ConsulHttpClient::new("http://127.0.0.1:8500")?);
//! let provider = ConsulConfigurationSource::new("app/db")?
//!     .with_reload_on_change(true)
//!     .build(client);
//!
//! provider.load().await?;
//! let host = provider.try_get("connection:host");
//! # let _ = host;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the flatten/fetch/watch logic inside `core`. End users should prefer the re-exports
//! documented below instead of reaching into internal modules directly.
//!
//! # Error Handling
//! Library APIs return domain error types built with `thiserror`; the binary and the option
//! loader use `eyre::Result<T>` with context attached through `WrapErr`.
//!
//! # Concurrency
//! Installed data lives in an `arc_swap::ArcSwapOption`, so lookups never block a reload and
//! always observe a complete mapping.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod error;
pub mod ports;
pub mod tracing_setup;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ConsulHttpClient, FileSnapshotStore},
    core::{
        ConfigData, ConsulConfigurationProvider, ConsulConfigurationSource, LoadDecision,
        WatchDecision,
    },
    error::{ConsulConfigError, ConsulConfigResult},
    ports::{config_provider::ConfigurationProvider, kv_client::KvClient},
};
