//! Configuration loading from `~/.objlink/config.toml` with defaults.
//!
//! A missing, unreadable or invalid file never prevents startup: the problem
//! is logged and defaults are used.

use objlink_types::{LinkConfig, LinkError, LinkResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config location.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".objlink")
        .join("config.toml")
}

/// Parse a TOML document into a [`LinkConfig`].
pub fn parse_config(contents: &str) -> LinkResult<LinkConfig> {
    let config: LinkConfig =
        toml::from_str(contents).map_err(|e| LinkError::Config(e.to_string()))?;
    if config.request_timeout_ms == 0 {
        return Err(LinkError::Config(
            "request_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(config)
}

/// Load configuration from a TOML file, with defaults.
pub fn load_config(path: Option<&Path>) -> LinkConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return LinkConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                LinkConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            LinkConfig::default()
        }
    }
}
