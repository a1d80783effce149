pub mod fetcher;
pub mod flattener;
pub mod provider;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;
pub mod watcher;

pub use fetcher::{ConfigFetcher, ConfigQueryResult, QueryStatus};
pub use flattener::{ConfigData, ConfigValue};
pub use provider::ConsulConfigurationProvider;
pub use source::{
    ConsulConfigurationSource, LoadDecision, LoadExceptionContext, WatchDecision,
    WatchExceptionContext,
};
pub use watcher::ChangeWatcher;
