//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber as configured in
//! [`LoggingConfig`]. `RUST_LOG` overrides the configured level.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already installed.
///
/// With `log_to_file` set, output goes to the log file only.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match (open_log_file(config)?, config.json_format) {
        (Some(file), true) => builder
            .json()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        (Some(file), false) => builder.with_ansi(false).with_writer(Mutex::new(file)).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

fn open_log_file(config: &LoggingConfig) -> Result<Option<File>> {
    if !config.log_to_file {
        return Ok(None);
    }
    let Some(path) = &config.log_file_path else {
        return Err(ProtocolError::ConfigError(
            "log_file_path must be specified when log_to_file is true".to_string(),
        ));
    };
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_needs_path() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(init_logging(&config), Err(ProtocolError::ConfigError(_))));
    }
}
