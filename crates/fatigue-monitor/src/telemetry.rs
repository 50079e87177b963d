//! Prometheus metrics

use crate::MonitorError;
use alerting::{DispatchOutcome, SendReport};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metric names
pub mod names {
    // Frame loop
    pub const FRAMES_PROCESSED_TOTAL: &str = "fatigue_frames_processed_total";
    pub const FRAME_FAILURES_TOTAL: &str = "fatigue_frame_failures_total";
    pub const DETECTION_DURATION_SECONDS: &str = "fatigue_detection_duration_seconds";

    // Fatigue state
    pub const FATIGUE_ACTIVE: &str = "fatigue_active";
    pub const FATIGUE_EPISODES_TOTAL: &str = "fatigue_episodes_total";

    // Alerts
    pub const ALERTS_DISPATCHED_TOTAL: &str = "fatigue_alerts_dispatched_total";
    pub const ALERTS_SUPPRESSED_TOTAL: &str = "fatigue_alerts_suppressed_total";
    pub const ALERTS_SENT_TOTAL: &str = "fatigue_alerts_sent_total";
    pub const ALERTS_FAILED_TOTAL: &str = "fatigue_alerts_failed_total";
}

/// Install the recorder and serve `/metrics` on `listen`.
///
/// Must run inside the Tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), MonitorError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| MonitorError::Metrics(e.to_string()))
}

pub fn record_frame_processed(detection_secs: f64) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
    histogram!(names::DETECTION_DURATION_SECONDS).record(detection_secs);
}

pub fn record_frame_failure(kind: &'static str) {
    counter!(names::FRAME_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_fatigue_edge(active: bool) {
    gauge!(names::FATIGUE_ACTIVE).set(if active { 1.0 } else { 0.0 });
    if active {
        counter!(names::FATIGUE_EPISODES_TOTAL).increment(1);
    }
}

pub fn record_dispatch(outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Dispatched => counter!(names::ALERTS_DISPATCHED_TOTAL).increment(1),
        DispatchOutcome::SuppressedOutstanding => {
            counter!(names::ALERTS_SUPPRESSED_TOTAL, "reason" => "outstanding").increment(1)
        }
        DispatchOutcome::SuppressedCooldown => {
            counter!(names::ALERTS_SUPPRESSED_TOTAL, "reason" => "cooldown").increment(1)
        }
        DispatchOutcome::Idle | DispatchOutcome::Rearmed => {}
    }
}

pub fn record_send(report: &SendReport) {
    match report.result {
        Ok(_) => counter!(names::ALERTS_SENT_TOTAL).increment(1),
        Err(_) => counter!(names::ALERTS_FAILED_TOTAL).increment(1),
    }
}
