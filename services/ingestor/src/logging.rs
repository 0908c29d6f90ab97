//! Tracing subscriber setup

use anyhow::{Context, Result};
use service_config::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. Call once, from `main`.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("Invalid log level '{}'", settings.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if settings.json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(true).try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
