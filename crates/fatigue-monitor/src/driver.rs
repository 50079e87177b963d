//! Frame loop orchestration

use crate::presenter::{FrameReport, Presenter};
use crate::telemetry;
use crate::PipelineConfig;
use alerting::{AlertDispatcher, DispatchOutcome, NotificationGateway};
use camera_capture::{FrameSource, VideoFrame};
use dms::{DetectionResult, FatigueStateMachine, FatigueVerdict, FrameAnalyzer};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::block_in_place;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Dropped by the frame-skip policy
    Skipped,
    /// Camera fetch or decode failed; nothing changed
    SourceFailed(&'static str),
    Processed {
        verdict: FatigueVerdict,
        dispatch: DispatchOutcome,
    },
}

/// Session statistics reported at shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub duration: Duration,
    pub ticks: u64,
    pub frames_processed: u64,
    pub frame_failures: u64,
    pub fatigue_episodes: u64,
    pub alerts_dispatched: u64,
    pub alerts_sent: u64,
    pub alert_failures: u64,
}

/// Sequential frame loop: source, detector, state machine, dispatcher,
/// presenter
pub struct PipelineDriver<S, A, G, P> {
    source: S,
    analyzer: A,
    fatigue: FatigueStateMachine,
    dispatcher: AlertDispatcher<G>,
    presenter: P,
    config: PipelineConfig,
    started_at: Instant,
    ticks: u64,
    frames_processed: u64,
    frame_failures: u64,
}

impl<S, A, G, P> PipelineDriver<S, A, G, P>
where
    S: FrameSource,
    A: FrameAnalyzer,
    G: NotificationGateway,
    P: Presenter,
{
    pub fn new(
        source: S,
        analyzer: A,
        fatigue: FatigueStateMachine,
        dispatcher: AlertDispatcher<G>,
        presenter: P,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            analyzer,
            fatigue,
            dispatcher,
            presenter,
            config,
            started_at: now(),
            ticks: 0,
            frames_processed: 0,
            frame_failures: 0,
        }
    }

    /// Run one iteration. Per-frame failures are absorbed here.
    pub async fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;
        self.collect_sends();

        if self.ticks % u64::from(self.config.frame_skip.max(1)) != 0 {
            return TickOutcome::Skipped;
        }

        let frame = match self.source.fetch_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                self.frame_failures += 1;
                warn!("Tick {}: frame skipped ({})", self.ticks, e);
                telemetry::record_frame_failure(e.kind());
                return TickOutcome::SourceFailed(e.kind());
            }
        };

        let detect_start = Instant::now();
        let detection = analyze_blocking(&self.analyzer, &frame);
        telemetry::record_frame_processed(detect_start.elapsed().as_secs_f64());
        self.frames_processed += 1;

        let at = now();
        let verdict = self.fatigue.update(detection.any_eyes_observed, at);
        if verdict.rising_edge || verdict.falling_edge {
            telemetry::record_fatigue_edge(verdict.fatigue_now);
        }

        let dispatch = self.dispatcher.on_verdict(&verdict, at);
        telemetry::record_dispatch(dispatch);

        self.presenter.present(&FrameReport {
            frame: &frame,
            detection: &detection,
            eyes_absent_for: verdict.eyes_absent_for,
            fatigue_active: verdict.fatigue_now,
            total_alerts_sent: self.dispatcher.state().total_alerts_sent,
            session_elapsed: at.saturating_duration_since(self.started_at),
        });

        TickOutcome::Processed { verdict, dispatch }
    }

    /// Tick at the configured interval until `stop` turns true or its
    /// sender is dropped, then shut down.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> SessionSummary {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Frame loop started (every {}ms, processing 1 in {})",
            self.config.tick_interval_ms, self.config.frame_skip
        );

        while !*stop.borrow() {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        debug!("Stop sender dropped");
                        break;
                    }
                }
                _ = interval.tick() => {
                    // A stop request cuts short a stalled camera fetch
                    tokio::select! {
                        biased;
                        _ = stop.changed() => {}
                        _ = self.tick() => {}
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Wait briefly for in-flight sends and report the session
    pub async fn shutdown(&mut self) -> SessionSummary {
        info!("Stopping monitor...");

        for report in self
            .dispatcher
            .wait_for_in_flight(self.config.shutdown_grace())
            .await
        {
            telemetry::record_send(&report);
        }

        let alerts = self.dispatcher.state();
        let summary = SessionSummary {
            duration: now().saturating_duration_since(self.started_at),
            ticks: self.ticks,
            frames_processed: self.frames_processed,
            frame_failures: self.frame_failures,
            fatigue_episodes: self.fatigue.episodes(),
            alerts_dispatched: alerts.dispatched,
            alerts_sent: alerts.total_alerts_sent,
            alert_failures: alerts.failed_sends,
        };

        info!("Session duration: {:.1}s", summary.duration.as_secs_f64());
        info!(
            "Frames processed: {} ({} failed fetches)",
            summary.frames_processed, summary.frame_failures
        );
        info!(
            "Fatigue episodes: {}, alerts sent: {} ({} failed)",
            summary.fatigue_episodes, summary.alerts_sent, summary.alert_failures
        );

        summary
    }

    fn collect_sends(&mut self) {
        for report in self.dispatcher.collect_completed() {
            telemetry::record_send(&report);
        }
    }

    pub fn fatigue(&self) -> &FatigueStateMachine {
        &self.fatigue
    }

    pub fn dispatcher(&self) -> &AlertDispatcher<G> {
        &self.dispatcher
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Cascade scans are CPU-bound; keep them off the worker on multi-threaded runtimes
fn analyze_blocking<A: FrameAnalyzer>(analyzer: &A, frame: &VideoFrame) -> DetectionResult {
    match Handle::current().runtime_flavor() {
        RuntimeFlavor::MultiThread => block_in_place(|| analyzer.analyze(frame)),
        _ => analyzer.analyze(frame),
    }
}

/// Loop clock; follows Tokio's clock so paused-time tests drive it
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
