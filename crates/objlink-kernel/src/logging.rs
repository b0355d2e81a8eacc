//! Tracing subscriber setup.

use objlink_types::LinkConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// configured level. Does nothing if a global subscriber is already set.
pub fn init_tracing(config: &LinkConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .try_init();
}
