//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::TelemetryConfig;

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured
/// filter. Returns false when a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    result.is_ok()
}
