//! Per-frame detection results

use crate::detector::Region;
use serde::{Deserialize, Serialize};

/// One face and the eyes found inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceDetection {
    /// Face bounding box (frame coordinates)
    pub face: Region,

    /// Eye boxes inside the face (frame coordinates)
    pub eyes: Vec<Region>,
}

/// Complete detection result for one frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Faces in detector order, each with its eyes
    pub faces: Vec<FaceDetection>,

    /// At least one eye in at least one face
    pub any_eyes_observed: bool,
}

impl DetectionResult {
    pub fn new(faces: Vec<FaceDetection>) -> Self {
        let any_eyes_observed = faces.iter().any(|f| !f.eyes.is_empty());
        Self {
            faces,
            any_eyes_observed,
        }
    }

    /// Face boxes only
    pub fn face_regions(&self) -> impl Iterator<Item = &Region> {
        self.faces.iter().map(|f| &f.face)
    }

    /// All eye boxes across faces
    pub fn eye_regions(&self) -> impl Iterator<Item = &Region> {
        self.faces.iter().flat_map(|f| f.eyes.iter())
    }

    pub fn eye_count(&self) -> usize {
        self.faces.iter().map(|f| f.eyes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_eyes_derived_from_faces() {
        assert!(!DetectionResult::default().any_eyes_observed);

        let blind = DetectionResult::new(vec![FaceDetection {
            face: Region::new(0, 0, 40, 40),
            eyes: vec![],
        }]);
        assert!(!blind.any_eyes_observed);
        assert_eq!(blind.face_regions().count(), 1);

        let seen = DetectionResult::new(vec![
            FaceDetection {
                face: Region::new(0, 0, 40, 40),
                eyes: vec![],
            },
            FaceDetection {
                face: Region::new(50, 0, 40, 40),
                eyes: vec![Region::new(60, 10, 8, 8)],
            },
        ]);
        assert!(seen.any_eyes_observed);
        assert_eq!(seen.eye_count(), 1);
    }
}
