//! Tracing and configuration helpers shared by the subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use forcelink_relay::RelayConfig;
use forcelink_session::ClientConfig;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Map `-v` occurrences to a level filter.
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The `[relay]` table of the configuration file.
#[derive(Debug, Default, Deserialize)]
struct RelaySection {
    #[serde(default)]
    relay: RelayConfig,
}

/// Load the client configuration from `path` (if it exists) and the
/// environment.
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    load_client_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_client_config`] with an explicit environment lookup.
pub fn load_client_config_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig> {
    let mut config = if path.exists() {
        ClientConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "no config file, using environment only");
        ClientConfig::new(String::new(), String::new())
    };
    config.apply_env_from(lookup);
    config.validate().with_context(|| {
        format!(
            "set consumer_key and callback_url in {} or via FORCELINK_CONSUMER_KEY and \
             FORCELINK_CALLBACK_URL",
            path.display()
        )
    })?;
    Ok(config)
}

/// Load the `[relay]` table from `path`, or defaults if there is no file.
pub fn load_relay_config(path: &Path) -> Result<RelayConfig> {
    if !path.exists() {
        return Ok(RelayConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let section: RelaySection =
        toml::from_str(&contents).with_context(|| format!("invalid {}", path.display()))?;
    Ok(section.relay)
}
