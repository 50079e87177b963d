//! Status presentation for processed frames

use camera_capture::VideoFrame;
use dms::DetectionResult;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const FACE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const EYE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BORDER_WIDTH: u32 = 6;

/// Everything shown for one processed frame
#[derive(Debug, Clone, Copy)]
pub struct FrameReport<'a> {
    pub frame: &'a VideoFrame,
    pub detection: &'a DetectionResult,
    /// Continuous eyes-absent time, while timing
    pub eyes_absent_for: Option<Duration>,
    pub fatigue_active: bool,
    pub total_alerts_sent: u64,
    pub session_elapsed: Duration,
}

/// Receives every processed frame; must not block
pub trait Presenter {
    fn present(&mut self, report: &FrameReport<'_>);
}

impl Presenter for Vec<Box<dyn Presenter + Send>> {
    fn present(&mut self, report: &FrameReport<'_>) {
        for presenter in self.iter_mut() {
            presenter.present(report);
        }
    }
}

/// Logs eye status changes and the fatigue banner
#[derive(Debug, Default)]
pub struct LogPresenter {
    eyes_open: Option<bool>,
    fatigue_active: bool,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eye status of the last frame, if any was presented
    pub fn eyes_open(&self) -> Option<bool> {
        self.eyes_open
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, report: &FrameReport<'_>) {
        let eyes = report.detection.any_eyes_observed;
        if self.eyes_open != Some(eyes) {
            if eyes {
                info!("Eyes: OPEN");
            } else {
                info!("Eyes: CLOSED / not detected");
            }
            self.eyes_open = Some(eyes);
        }

        if report.fatigue_active && !self.fatigue_active {
            warn!(
                "*** FATIGUE ALERT *** (session {:.0}s, alerts sent: {})",
                report.session_elapsed.as_secs_f64(),
                report.total_alerts_sent
            );
        }
        self.fatigue_active = report.fatigue_active;

        debug!(
            "Frame {}: {} face(s), {} eye(s), closed for {:.1}s, alerts sent: {}",
            report.frame.sequence,
            report.detection.faces.len(),
            report.detection.eye_count(),
            report.eyes_absent_for.unwrap_or_default().as_secs_f64(),
            report.total_alerts_sent
        );
    }
}

/// Writes an annotated copy of each frame to a fixed path
pub struct SnapshotPresenter {
    path: PathBuf,
}

impl SnapshotPresenter {
    pub fn new(path: PathBuf) -> Self {
        info!("Writing annotated frames to {}", path.display());
        Self { path }
    }

    /// Faces in blue, eyes as green circles, red border while fatigued
    pub fn render(report: &FrameReport<'_>) -> RgbImage {
        let mut image = report.frame.image.clone();

        for face in report.detection.face_regions() {
            let rect = Rect::at(face.x as i32, face.y as i32).of_size(face.width, face.height);
            draw_hollow_rect_mut(&mut image, rect, FACE_COLOR);
        }

        for eye in report.detection.eye_regions() {
            let (cx, cy) = eye.center();
            let radius = (eye.width.min(eye.height) / 2).max(1);
            draw_hollow_circle_mut(&mut image, (cx as i32, cy as i32), radius as i32, EYE_COLOR);
        }

        if report.fatigue_active {
            let (width, height) = image.dimensions();
            let border = BORDER_WIDTH.min(width / 2).min(height / 2);
            for inset in 0..border {
                let rect = Rect::at(inset as i32, inset as i32)
                    .of_size(width - 2 * inset, height - 2 * inset);
                draw_hollow_rect_mut(&mut image, rect, ALERT_COLOR);
            }
        }

        image
    }
}

impl Presenter for SnapshotPresenter {
    fn present(&mut self, report: &FrameReport<'_>) {
        if let Err(e) = Self::render(report).save(&self.path) {
            warn!("Failed to write snapshot {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms::{FaceDetection, Region};

    fn frame() -> VideoFrame {
        VideoFrame::new(RgbImage::from_pixel(64, 48, Rgb([50, 50, 50])), 7)
    }

    fn detection() -> DetectionResult {
        DetectionResult::new(vec![FaceDetection {
            face: Region::new(10, 10, 30, 30),
            eyes: vec![Region::new(16, 16, 8, 8)],
        }])
    }

    fn report<'a>(
        frame: &'a VideoFrame,
        detection: &'a DetectionResult,
        fatigue_active: bool,
    ) -> FrameReport<'a> {
        FrameReport {
            frame,
            detection,
            eyes_absent_for: None,
            fatigue_active,
            total_alerts_sent: 0,
            session_elapsed: Duration::from_secs(12),
        }
    }

    #[test]
    fn test_render_annotations() {
        let frame = frame();
        let detection = detection();
        let image = SnapshotPresenter::render(&report(&frame, &detection, false));

        assert_eq!(*image.get_pixel(10, 20), FACE_COLOR);
        // Eye circle: center (20, 20), radius 4
        assert_eq!(*image.get_pixel(24, 20), EYE_COLOR);
        assert_eq!(*image.get_pixel(0, 0), Rgb([50, 50, 50]));
    }

    #[test]
    fn test_render_fatigue_border() {
        let frame = frame();
        let detection = DetectionResult::default();
        let image = SnapshotPresenter::render(&report(&frame, &detection, true));

        assert_eq!(*image.get_pixel(0, 0), ALERT_COLOR);
        assert_eq!(*image.get_pixel(63, 47), ALERT_COLOR);
        assert_eq!(*image.get_pixel(BORDER_WIDTH - 1, 20), ALERT_COLOR);
        assert_eq!(*image.get_pixel(32, 24), Rgb([50, 50, 50]));
    }

    #[test]
    fn test_snapshot_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let frame = frame();
        let detection = detection();

        let mut presenter = SnapshotPresenter::new(path.clone());
        presenter.present(&report(&frame, &detection, true));

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (64, 48));
        assert_eq!(*written.get_pixel(0, 0), ALERT_COLOR);
    }

    #[test]
    fn test_log_presenter_tracks_eye_status() {
        let frame = frame();
        let mut presenter = LogPresenter::new();
        assert_eq!(presenter.eyes_open(), None);

        let seen = detection();
        presenter.present(&report(&frame, &seen, false));
        assert_eq!(presenter.eyes_open(), Some(true));

        let blind = DetectionResult::default();
        presenter.present(&report(&frame, &blind, true));
        assert_eq!(presenter.eyes_open(), Some(false));
    }
}
