pub mod loader;
pub mod models;
pub mod validation;

pub use loader::load_source_config;
pub use models::*;
pub use validation::{SourceConfigValidator, ValidationError, ValidationResult};
