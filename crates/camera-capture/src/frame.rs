//! Video frame types and processing

use crate::CameraError;
use image::{GrayImage, Luma, RgbImage};
use std::time::SystemTime;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixels (height x width x 3)
    pub image: RgbImage,
    /// Wall-clock capture time
    pub captured_at: SystemTime,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Wrap an already decoded RGB image
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
            sequence,
        }
    }

    /// Decode a compressed still (JPEG, PNG, ...) into an RGB frame
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self, CameraError> {
        if bytes.is_empty() {
            return Err(CameraError::Decode("empty body".to_string()));
        }

        let decoded =
            image::load_from_memory(bytes).map_err(|e| CameraError::Decode(e.to_string()))?;

        Ok(Self::new(decoded.to_rgb8(), sequence))
    }

    /// Frame width
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let pixel = self.image.get_pixel(x, y);
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let y = pixel[0] as f32 * 0.299 + pixel[1] as f32 * 0.587 + pixel[2] as f32 * 0.114;
            Luma([y.round().min(255.0) as u8])
        })
    }
}
