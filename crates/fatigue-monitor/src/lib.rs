//! Driver Fatigue Monitor
//!
//! Wires the snapshot camera, the face/eye detector, the fatigue state
//! machine and the alert dispatcher into one paced frame loop.

pub mod driver;
pub mod logging;
pub mod presenter;
pub mod settings;
pub mod telemetry;

pub use driver::{PipelineDriver, SessionSummary, TickOutcome};
pub use logging::init_logging;
pub use presenter::{FrameReport, LogPresenter, Presenter, SnapshotPresenter};
pub use settings::{AppConfig, LoggingConfig, MetricsConfig, PipelineConfig};

use alerting::GatewayError;
use camera_capture::CameraError;
use dms::DmsError;
use thiserror::Error;

/// Startup errors; nothing inside the frame loop produces one
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("Detector unavailable: {0}")]
    Detector(#[from] DmsError),

    #[error("Camera setup failed: {0}")]
    Camera(#[from] CameraError),

    #[error("Alert gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Failed to install logger: {0}")]
    Logging(String),

    #[error("Failed to install metrics exporter: {0}")]
    Metrics(String),
}
