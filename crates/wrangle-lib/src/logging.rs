//! Global subscriber initialization.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::sync::OnceLock;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

static LOGGING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// `RUST_LOG` wins over the configured level when it is set.
fn filter_for(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(config.level.trim())
            .map_err(|e| eyre!("Invalid logging.level '{}': {}", config.level, e)),
    }
}

/// Install the global subscriber. Logs go to stderr so previews and code on
/// stdout stay clean. Later calls are no-ops.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Ok(());
    }
    let filter = filter_for(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)),
        ),
        LogFormat::Full => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_target(true),
            ),
        ),
    };
    if let Err(error) = installed {
        tracing::debug!(error = %error, "Tracing subscriber already initialized");
    }
    let _ = LOGGING_INITIALIZED.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "wrangle=notalevel".to_string(),
            format: LogFormat::Compact,
        };
        assert!(filter_for(&config).is_err());
        assert!(filter_for(&LoggingConfig::default()).is_ok());
    }
}
