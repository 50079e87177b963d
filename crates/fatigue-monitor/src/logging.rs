//! Tracing subscriber setup

use crate::{LoggingConfig, MonitorError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn parse_level(level: &str) -> Result<Level, MonitorError> {
    Level::from_str(level.trim())
        .map_err(|_| MonitorError::Invalid(format!("unknown log level '{}'", level)))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logging(config: &LoggingConfig) -> Result<(), MonitorError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.level)?)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    installed.map_err(|e| MonitorError::Logging(e.to_string()))
}
