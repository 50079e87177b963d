//! Face and eye detection

use crate::analysis::{DetectionResult, FaceDetection};
use crate::{DmsConfig, DmsError, HaarCascade, ScanParams};
use camera_capture::frame::VideoFrame;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One past the last column
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the last row
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Shift by an offset (sub-image to frame coordinates)
    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Intersection with a `width` x `height` image, if non-empty
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped = Self::new(
            self.x,
            self.y,
            self.width.min(width - self.x),
            self.height.min(height - self.y),
        );
        (clamped.width > 0 && clamped.height > 0).then_some(clamped)
    }
}

/// Multi-scale object detector over a grayscale image
pub trait RegionDetector {
    fn detect_regions(&self, image: &GrayImage, params: &ScanParams) -> Vec<Region>;
}

/// Per-frame eye observation
pub trait FrameAnalyzer {
    fn analyze(&self, frame: &VideoFrame) -> DetectionResult;
}

/// Two-stage detector: faces first, then eyes inside each face
pub struct EyeOpennessDetector<F = HaarCascade, E = HaarCascade> {
    face_detector: F,
    eye_detector: E,
    face_params: ScanParams,
    eye_params: ScanParams,
}

impl EyeOpennessDetector {
    /// Load both cascades named in the configuration.
    ///
    /// Any failure here means the monitor cannot run.
    pub fn from_config(config: &DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;

        info!(
            "Loading face cascade from {}",
            config.face_cascade_path.display()
        );
        let face_detector = HaarCascade::from_file(&config.face_cascade_path)?;

        info!("Loading eye cascade from {}", config.eye_cascade_path.display());
        let eye_detector = HaarCascade::from_file(&config.eye_cascade_path)?;

        Ok(Self::new(face_detector, eye_detector, config.face, config.eye))
    }
}

impl<F: RegionDetector, E: RegionDetector> EyeOpennessDetector<F, E> {
    pub fn new(
        face_detector: F,
        eye_detector: E,
        face_params: ScanParams,
        eye_params: ScanParams,
    ) -> Self {
        Self {
            face_detector,
            eye_detector,
            face_params,
            eye_params,
        }
    }

    /// Detect faces and the eyes inside them
    pub fn detect(&self, frame: &VideoFrame) -> DetectionResult {
        self.detect_gray(&frame.to_grayscale())
    }

    /// Same as [`detect`](Self::detect) on an already converted image.
    ///
    /// Eye regions are reported in full-image coordinates.
    pub fn detect_gray(&self, gray: &GrayImage) -> DetectionResult {
        let (width, height) = gray.dimensions();
        let faces = self.face_detector.detect_regions(gray, &self.face_params);

        let detections: Vec<FaceDetection> = faces
            .into_iter()
            .filter_map(|face| face.clamp_to(width, height))
            .map(|face| {
                let roi =
                    image::imageops::crop_imm(gray, face.x, face.y, face.width, face.height)
                        .to_image();
                let eyes = self
                    .eye_detector
                    .detect_regions(&roi, &self.eye_params)
                    .into_iter()
                    .map(|eye| eye.translate(face.x, face.y))
                    .collect();
                FaceDetection { face, eyes }
            })
            .collect();

        let result = DetectionResult::new(detections);
        debug!(
            "Detected {} face(s), {} eye(s)",
            result.faces.len(),
            result.eye_count()
        );
        result
    }
}

impl<F: RegionDetector, E: RegionDetector> FrameAnalyzer for EyeOpennessDetector<F, E> {
    fn analyze(&self, frame: &VideoFrame) -> DetectionResult {
        self.detect(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::{edge_image, EDGE_CASCADE};
    use image::{Luma, Rgb, RgbImage};
    use std::sync::Mutex;

    /// Returns fixed regions and records the size of every image it sees
    struct Scripted {
        regions: Vec<Region>,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl Scripted {
        fn new(regions: Vec<Region>) -> Self {
            Self {
                regions,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(u32, u32)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl RegionDetector for Scripted {
        fn detect_regions(&self, image: &GrayImage, _params: &ScanParams) -> Vec<Region> {
            self.seen.lock().unwrap().push(image.dimensions());
            self.regions.clone()
        }
    }

    fn params() -> ScanParams {
        DmsConfig::default().face
    }

    fn frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame::new(RgbImage::from_pixel(width, height, Rgb([60, 60, 60])), 1)
    }

    #[test]
    fn test_no_faces_means_no_eyes() {
        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![]),
            Scripted::new(vec![Region::new(1, 1, 5, 5)]),
            params(),
            params(),
        );

        let result = detector.detect(&frame(64, 48));
        assert!(result.faces.is_empty());
        assert!(!result.any_eyes_observed);
        assert!(detector.eye_detector.calls().is_empty());
    }

    #[test]
    fn test_face_without_eyes() {
        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![Region::new(10, 10, 30, 30)]),
            Scripted::new(vec![]),
            params(),
            params(),
        );

        let result = detector.detect(&frame(64, 48));
        assert_eq!(result.faces.len(), 1);
        assert!(!result.any_eyes_observed);
    }

    #[test]
    fn test_single_eye_counts_as_observed() {
        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![Region::new(10, 8, 30, 30)]),
            Scripted::new(vec![Region::new(4, 6, 8, 8)]),
            params(),
            params(),
        );

        let result = detector.detect(&frame(64, 48));
        assert!(result.any_eyes_observed);
        // Eye search ran on the face crop only
        assert_eq!(detector.eye_detector.calls(), vec![(30, 30)]);
        assert_eq!(result.faces[0].eyes, vec![Region::new(14, 14, 8, 8)]);
    }

    #[test]
    fn test_eyes_in_any_face() {
        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![Region::new(0, 0, 20, 20), Region::new(30, 0, 20, 20)]),
            Scripted::new(vec![Region::new(2, 2, 6, 6)]),
            params(),
            params(),
        );

        let result = detector.detect(&frame(64, 48));
        assert_eq!(result.faces.len(), 2);
        assert_eq!(result.eye_count(), 2);
        assert_eq!(result.eye_regions().count(), 2);
    }

    #[test]
    fn test_face_clipped_to_frame() {
        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![Region::new(50, 40, 30, 30), Region::new(70, 0, 5, 5)]),
            Scripted::new(vec![]),
            params(),
            params(),
        );

        let result = detector.detect(&frame(64, 48));
        assert_eq!(result.faces.len(), 1);
        assert_eq!(result.faces[0].face, Region::new(50, 40, 14, 8));
        assert_eq!(detector.eye_detector.calls(), vec![(14, 8)]);
    }

    #[test]
    fn test_cascade_eye_stage_restricted_to_face() {
        let eye_cascade = HaarCascade::from_xml(EDGE_CASCADE).unwrap();
        let eye_params = ScanParams {
            scale_factor: 1.25,
            min_neighbors: 0,
            min_size: 4,
            max_size: None,
        };

        // Edge at x=20, face region covers x in [10, 30)
        let mut gray = edge_image(64, 32, 20);
        // A second edge outside the face must be ignored
        for y in 0..32 {
            for x in 44..50 {
                gray.put_pixel(x, y, Luma([255]));
            }
        }

        let detector = EyeOpennessDetector::new(
            Scripted::new(vec![Region::new(10, 0, 20, 32)]),
            eye_cascade,
            params(),
            eye_params,
        );

        let result = detector.detect_gray(&gray);
        assert!(result.any_eyes_observed);
        for eye in result.eye_regions() {
            assert!(eye.x >= 10 && eye.right() <= 30, "eye {:?} outside face", eye);
        }
    }

    #[test]
    fn test_region_helpers() {
        let region = Region::new(10, 20, 30, 40);
        assert_eq!(region.right(), 40);
        assert_eq!(region.bottom(), 60);
        assert_eq!(region.center(), (25, 40));
        assert_eq!(region.clamp_to(5, 5), None);
        assert_eq!(region.clamp_to(100, 100), Some(region));
    }
}
