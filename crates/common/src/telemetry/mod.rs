//! Tracing subscriber setup

use crate::config::ObservabilityConfig;
use crate::errors::{AppError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this a
/// second time returns a configuration error and leaves the first
/// subscriber in place.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| AppError::Configuration {
            message: format!("invalid log level '{}': {}", config.log_level, e),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| AppError::Configuration {
        message: format!("tracing subscriber already installed: {}", e),
    })?;

    tracing::info!(service = %config.service_name, version = crate::VERSION, "Tracing initialized");
    Ok(())
}
