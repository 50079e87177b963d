//! Driver Monitoring System (DMS)
//!
//! Real-time driver state analysis using classic computer vision:
//! - Haar cascade face detection (OpenCV XML models, pure Rust evaluation)
//! - Eye search confined to each detected face
//! - Continuous eyes-absent timing with edge-triggered fatigue verdicts

pub mod analysis;
pub mod cascade;
pub mod config;
pub mod detector;
pub mod grouping;
pub mod state;

pub use analysis::{DetectionResult, FaceDetection};
pub use cascade::{HaarCascade, ScanParams};
pub use config::DmsConfig;
pub use detector::{EyeOpennessDetector, FrameAnalyzer, Region, RegionDetector};
pub use state::{FatiguePhase, FatigueState, FatigueStateMachine, FatigueVerdict};

use thiserror::Error;

/// DMS error types
#[derive(Error, Debug)]
pub enum DmsError {
    /// Classifier could not be loaded; fatal at startup
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
