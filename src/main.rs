use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use consul_config::{
    ConfigData, ConsulConfigurationProvider, ConsulConfigurationSource, ConsulHttpClient,
    LoadDecision, WatchDecision,
    config::{SourceConfigValidator, load_source_config},
    core::source::DEFAULT_WATCH_RETRY_DELAY,
    tracing_setup,
};
use tracing::{Instrument, Span};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "consul-config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a source options file
    Validate {
        /// Options file to validate
        #[clap(short, long, default_value = "consul-config.toml")]
        config: String,
    },
    /// Write a starter options file
    Init {
        /// Output path for the new options file
        #[clap(short, long, default_value = "consul-config.toml")]
        config: String,
    },
    /// Load the key and print the flattened configuration (default)
    Watch {
        /// Options file to use
        #[clap(short, long, default_value = "consul-config.toml")]
        config: String,
        /// Print once and exit instead of following changes
        #[clap(long)]
        once: bool,
        /// Human-readable logs instead of JSON
        #[clap(long)]
        pretty_logs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Watch {
            config,
            once,
            pretty_logs,
        }) => watch_command(&config, once, pretty_logs).await,
        None => watch_command(&args.config, false, false).await,
    }
}

fn print_data(data: Option<Arc<ConfigData>>) -> Result<()> {
    let data = data.unwrap_or_default();
    let rendered =
        serde_json::to_string_pretty(data.as_ref()).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

/// Load the configured key and print it, then follow reloads until Ctrl+C
async fn watch_command(config_path: &str, once: bool, pretty_logs: bool) -> Result<()> {
    if pretty_logs {
        tracing_setup::init_console_tracing()
    } else {
        tracing_setup::init_tracing()
    }
    .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading source options from {config_path}");
    let options = load_source_config(config_path)
        .with_context(|| format!("Failed to load source options from {config_path}"))?;

    let client = Arc::new(
        ConsulHttpClient::from_config(&options).context("Failed to create Consul client")?,
    );
    let source = ConsulConfigurationSource::from_config(&options)
        .context("Invalid source options")?
        .with_reload_on_change(options.reload_on_change && !once)
        .on_load_exception(|context| {
            // An optional key tolerates Consul being unreachable at startup.
            if context.source.optional {
                LoadDecision::Ignore
            } else {
                LoadDecision::Propagate
            }
        })
        .on_watch_exception(|context| {
            if context.consecutive_failures % 10 == 0 {
                tracing::error!(
                    failures = context.consecutive_failures,
                    "Consul keeps failing, still retrying"
                );
            }
            WatchDecision::Retry(DEFAULT_WATCH_RETRY_DELAY)
        });

    let span = tracing_setup::create_source_span(source.key(), source.reload_on_change);
    let provider = source.build(client);
    let result = follow(&provider, &options.key, &span)
        .instrument(span.clone())
        .await;
    provider.shutdown().await;
    result
}

async fn follow(provider: &ConsulConfigurationProvider, key: &str, span: &Span) -> Result<()> {
    provider
        .load()
        .await
        .with_context(|| format!("Failed to load key {key}"))?;
    span.record("consul.index", provider.last_index());
    print_data(provider.data())?;

    if !provider.is_watching() {
        return Ok(());
    }

    let mut reloads = provider.subscribe();
    loop {
        tokio::select! {
            changed = reloads.changed() => {
                if changed.is_err() {
                    break;
                }
                span.record("consul.index", provider.last_index());
                print_data(provider.data())?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Validate an options file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating options file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Options file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_source_config(config_path) {
        Ok(config) => {
            println!("✅ Options parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Options parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match SourceConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Options validation: OK");
            println!();
            println!("📋 Source Summary:");
            println!("   • Consul Address: {}", config.address);
            println!("   • Key: {}", config.key);
            println!("   • Optional: {}", config.optional);
            println!("   • Reload On Change: {}", config.reload_on_change);
            println!("   • Poll Wait: {}s", config.poll_wait_secs);
            println!();
            println!("🎉 Options are valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Options validation failed:");
            eprintln!("{e}");
            eprintln!();
            eprintln!("💡 Common fixes:");
            eprintln!("   • Ensure the address starts with http:// or https://");
            eprintln!("   • Ensure the key is not blank");
            eprintln!("   • Use a poll wait and request timeout above zero");
            std::process::exit(1);
        }
    }
}

/// Initialize a new options file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Options file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Consul configuration source

# Base URL of the Consul HTTP API
address = "http://127.0.0.1:8500"

# Key (or key prefix) holding the configuration
key = "app/config"

# Tolerate a missing key at startup
optional = false

# Long-poll the key and reload on change
reload_on_change = true
poll_wait_secs = 300
request_timeout_secs = 10

# "json" flattens documents, "simple" keeps each payload as one value
parser = "json"

# token = "..."
# datacenter = "dc1"
# key_to_remove = "app"
# snapshot_dir = "./.consul-snapshot"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write options file")?;
    println!("✅ Created default options at: {config_path}");
    println!("   Run 'consul-config watch --config {config_path}' to follow the key");
    Ok(())
}
