//! Logging setup
//!
//! Library code only emits `tracing` events; binaries and tests decide
//! whether and how to install a subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Build the event filter: `RUST_LOG` wins over the configured directive
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Returns false if one was already installed (tests install repeatedly).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(config));
    let installed = match config.format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if !installed {
        tracing::debug!("Tracing subscriber already installed");
    }
    installed
}
