//! Application configuration
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. TOML file (optional)
//! 3. `FATIGUE__<SECTION>__<KEY>` environment variables

use crate::logging::parse_level;
use crate::MonitorError;
use alerting::AlertConfig;
use camera_capture::CameraConfig;
use config::{Config, Environment, File};
use dms::DmsConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when none is given
pub const DEFAULT_CONFIG_PATH: &str = "config/fatigue-monitor.toml";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "FATIGUE_CONFIG";

const ENV_PREFIX: &str = "FATIGUE";

/// Frame loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Process every Nth tick (default: 2)
    pub frame_skip: u32,
    /// Tick period in milliseconds
    pub tick_interval_ms: u64,
    /// How long shutdown waits for in-flight alert sends
    pub shutdown_grace_ms: u64,
    /// Write an annotated copy of each processed frame here
    pub snapshot_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            tick_interval_ms: 33,
            shutdown_grace_ms: 2000,
            snapshot_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn validate(&self) -> Result<(), MonitorError> {
        if self.frame_skip == 0 {
            return Err(MonitorError::Invalid(
                "pipeline.frame_skip must be at least 1".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(MonitorError::Invalid(
                "pipeline.tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape address; no exporter when unset
    pub listen: Option<SocketAddr>,
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub dms: DmsConfig,
    pub alerts: AlertConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Config file path: explicit argument, then `FATIGUE_CONFIG`, then the default
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load and validate. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: &Path, env: Environment) -> Result<Self, MonitorError> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.camera.url.trim().is_empty() {
            return Err(MonitorError::Invalid("camera.url is empty".to_string()));
        }
        if self.camera.timeout_ms == 0 {
            return Err(MonitorError::Invalid(
                "camera.timeout_ms must be positive".to_string(),
            ));
        }

        self.dms.validate()?;
        self.alerts.validate()?;
        self.pipeline.validate()?;
        parse_level(&self.logging.level)?;

        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}
