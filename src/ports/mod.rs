pub mod config_provider;
pub mod kv_client;
pub mod parser;
pub mod snapshot_store;
