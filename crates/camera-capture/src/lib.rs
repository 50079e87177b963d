//! Camera Capture Library for the Driver Fatigue Monitor
//!
//! Pulls still frames from a networked cabin camera (ESP32-CAM style
//! `/capture` endpoint) over HTTP and decodes them into RGB frames.
//! Supports:
//! - One-shot snapshot fetch with a hard per-request timeout
//! - JPEG/PNG decoding into [`VideoFrame`]
//! - The [`FrameSource`] seam used by the pipeline driver

pub mod frame;
pub mod snapshot;

pub use frame::VideoFrame;
pub use snapshot::{fetch_frame, FrameSource, SnapshotCamera};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Capture timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Camera returned HTTP status {0}")]
    Status(u16),

    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

impl CameraError {
    /// Transport-level failure (timeout, connection, non-2xx status)
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CameraError::Timeout(_) | CameraError::Network(_) | CameraError::Status(_)
        )
    }

    /// The camera answered but the body was not a valid image
    pub fn is_decode(&self) -> bool {
        matches!(self, CameraError::Decode(_))
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::Client(_) => "client",
            CameraError::Timeout(_) => "timeout",
            CameraError::Network(_) => "network",
            CameraError::Status(_) => "status",
            CameraError::Decode(_) => "decode",
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Snapshot URL (e.g., "http://192.168.198.86/capture")
    pub url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "http://192.168.198.86/capture".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl CameraConfig {
    /// Create a config for a snapshot URL with the default timeout
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
