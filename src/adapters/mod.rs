pub mod consul_client;
pub mod file_snapshot;
pub mod parsers;

/// Re-export commonly used types from adapters
pub use consul_client::ConsulHttpClient;
pub use file_snapshot::FileSnapshotStore;
pub use parsers::{JsonConfigurationParser, SimpleConfigurationParser};
