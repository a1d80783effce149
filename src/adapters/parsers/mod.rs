pub mod json;
pub mod simple;

pub use json::JsonConfigurationParser;
pub use simple::SimpleConfigurationParser;
