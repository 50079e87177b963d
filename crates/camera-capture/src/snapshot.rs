//! HTTP snapshot acquisition

use crate::{CameraConfig, CameraError, VideoFrame};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Source of decoded frames, one per call
pub trait FrameSource {
    /// Fetch and decode the current frame
    fn fetch_frame(&mut self) -> impl Future<Output = Result<VideoFrame, CameraError>> + Send;
}

/// Fetch one snapshot from `url` and decode it.
///
/// The timeout bounds the whole request, body included. No retries are
/// attempted here.
pub async fn fetch_frame(
    client: &Client,
    url: &str,
    timeout: Duration,
    sequence: u64,
) -> Result<VideoFrame, CameraError> {
    let transport = |e: reqwest::Error| {
        if e.is_timeout() {
            CameraError::Timeout(timeout.as_millis() as u64)
        } else {
            CameraError::Network(e.to_string())
        }
    };

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(CameraError::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(transport)?;
    debug!("Snapshot {} received ({} bytes)", sequence, body.len());

    VideoFrame::decode(&body, sequence)
}

/// Networked camera exposing a single-image capture endpoint
pub struct SnapshotCamera {
    client: Client,
    config: CameraConfig,
    sequence: u64,
}

impl SnapshotCamera {
    /// Create a new snapshot camera
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| CameraError::Client(e.to_string()))?;

        info!(
            "Snapshot camera configured: {} (timeout {}ms)",
            config.url, config.timeout_ms
        );

        Ok(Self {
            client,
            config,
            sequence: 0,
        })
    }

    /// Snapshot URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Number of fetch attempts made so far
    pub fn attempts(&self) -> u64 {
        self.sequence
    }
}

impl FrameSource for SnapshotCamera {
    async fn fetch_frame(&mut self) -> Result<VideoFrame, CameraError> {
        self.sequence += 1;
        fetch_frame(
            &self.client,
            &self.config.url,
            self.config.timeout(),
            self.sequence,
        )
        .await
    }
}
