//! Connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for one object registry and its transport.
///
/// Every field has a default so a partial (or empty) TOML document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long `request_method` waits for a reply.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Answer failed or unknown method invocations with an `err` envelope
    /// instead of staying silent.
    ///
    /// An object with no methods never answers, so a process that only
    /// observes a topic cannot pre-empt the one serving it. Processes that
    /// each serve different methods of the same object can still race: the
    /// one lacking the member may reply `not_found` before the real reply
    /// arrives. Enable this only where one process serves all of an object's
    /// methods.
    #[serde(default)]
    pub reply_errors: bool,
    /// Tracing filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl LinkConfig {
    /// The request window as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            reply_errors: false,
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: LinkConfig = toml::from_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config: LinkConfig = toml::from_str(r#"endpoint = "nats://localhost:4222""#).unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: LinkConfig = toml::from_str(
            r#"
            request_timeout_ms = 250
            reply_errors = true
            "#,
        )
        .unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert!(config.reply_errors);
        assert_eq!(config.log_level, "info");
    }
}
