//! DMS configuration

use crate::{DmsError, ScanParams};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// DMS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Continuous eyes-absent time before fatigue is declared (seconds)
    pub fatigue_threshold_secs: f64,

    /// Frontal face cascade (OpenCV XML)
    pub face_cascade_path: PathBuf,

    /// Eye cascade (OpenCV XML)
    pub eye_cascade_path: PathBuf,

    /// Face scan parameters; keys left out keep the face defaults
    #[serde(deserialize_with = "face_params")]
    pub face: ScanParams,

    /// Eye scan parameters, applied inside each face region
    #[serde(deserialize_with = "eye_params")]
    pub eye: ScanParams,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            fatigue_threshold_secs: 3.0,
            face_cascade_path: PathBuf::from(
                "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
            ),
            eye_cascade_path: PathBuf::from(
                "/usr/share/opencv4/haarcascades/haarcascade_eye.xml",
            ),
            face: DEFAULT_FACE_SCAN,
            eye: DEFAULT_EYE_SCAN,
        }
    }
}

const DEFAULT_FACE_SCAN: ScanParams = ScanParams {
    scale_factor: 1.1,
    min_neighbors: 5,
    min_size: 30,
    max_size: None,
};

const DEFAULT_EYE_SCAN: ScanParams = ScanParams {
    scale_factor: 1.05,
    min_neighbors: 3,
    min_size: 10,
    max_size: None,
};

/// A `[dms.face]` / `[dms.eye]` table with any subset of keys
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialScanParams {
    scale_factor: Option<f32>,
    min_neighbors: Option<u32>,
    min_size: Option<u32>,
    max_size: Option<u32>,
}

impl PartialScanParams {
    fn over(self, base: ScanParams) -> ScanParams {
        ScanParams {
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            min_neighbors: self.min_neighbors.unwrap_or(base.min_neighbors),
            min_size: self.min_size.unwrap_or(base.min_size),
            max_size: self.max_size.or(base.max_size),
        }
    }
}

fn face_params<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ScanParams, D::Error> {
    PartialScanParams::deserialize(deserializer).map(|p| p.over(DEFAULT_FACE_SCAN))
}

fn eye_params<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ScanParams, D::Error> {
    PartialScanParams::deserialize(deserializer).map(|p| p.over(DEFAULT_EYE_SCAN))
}

impl DmsConfig {
    /// Fatigue threshold as a duration; saturates for values `validate` rejects
    pub fn fatigue_threshold(&self) -> Duration {
        Duration::try_from_secs_f64(self.fatigue_threshold_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Reject values the detector or state machine cannot work with
    pub fn validate(&self) -> Result<(), DmsError> {
        if !self.fatigue_threshold_secs.is_finite() || self.fatigue_threshold_secs <= 0.0 {
            return Err(DmsError::Config(format!(
                "fatigue threshold must be positive, got {}",
                self.fatigue_threshold_secs
            )));
        }
        if Duration::try_from_secs_f64(self.fatigue_threshold_secs).is_err() {
            return Err(DmsError::Config(format!(
                "fatigue threshold {} is out of range",
                self.fatigue_threshold_secs
            )));
        }
        self.face.validate("face")?;
        self.eye.validate("eye")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DmsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fatigue_threshold(), Duration::from_secs(3));
        assert_eq!(config.face.min_neighbors, 5);
        assert_eq!(config.eye.min_size, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = DmsConfig {
            fatigue_threshold_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::Config(_))));

        let mut config = DmsConfig::default();
        config.eye.scale_factor = 1.0;
        assert!(matches!(config.validate(), Err(DmsError::Config(_))));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = DmsConfig {
            fatigue_threshold_secs: 1e30,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DmsError::Config(_))));
        assert_eq!(config.fatigue_threshold(), Duration::MAX);
    }

    #[test]
    fn test_partial_scan_table_keeps_defaults() {
        let config: DmsConfig = serde_json::from_str(
            r#"{ "face": { "min_neighbors": 4 }, "eye": { "max_size": 40 } }"#,
        )
        .unwrap();

        assert_eq!(config.face, ScanParams { min_neighbors: 4, ..DEFAULT_FACE_SCAN });
        assert_eq!(config.eye, ScanParams { max_size: Some(40), ..DEFAULT_EYE_SCAN });
        assert_eq!(config.fatigue_threshold_secs, 3.0);
    }
}
