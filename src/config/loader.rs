use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ConsulSourceConfig;

/// Prefix for environment variables overriding file options.
pub const ENV_PREFIX: &str = "CONSUL_CONFIG";

/// Load source options from a file using the config crate, layered with
/// `CONSUL_CONFIG_*` environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, INI.
pub fn load_source_config(config_path: &str) -> Result<ConsulSourceConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let source_config: ConsulSourceConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(source_config)
}
