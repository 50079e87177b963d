//! Driver Fatigue Monitor - Main Entry Point

use alerting::{AlertDispatcher, Gateway};
use anyhow::Context;
use camera_capture::SnapshotCamera;
use dms::{EyeOpennessDetector, FatigueStateMachine};
use fatigue_monitor::telemetry::init_metrics;
use fatigue_monitor::{
    init_logging, AppConfig, LogPresenter, PipelineDriver, Presenter, SnapshotPresenter,
};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    init_logging(&config.logging)?;

    info!("=== Driver Fatigue Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(listen) = config.metrics.listen {
        init_metrics(listen)?;
        info!("Prometheus metrics on http://{}/metrics", listen);
    }

    // Detector assets must load before anything else starts
    let analyzer = EyeOpennessDetector::from_config(&config.dms)
        .context("loading face/eye classifiers")?;
    let camera = SnapshotCamera::new(config.camera.clone())?;

    let gateway = Gateway::from_config(config.alerts.gateway, &config.alerts.twilio)?;
    let dispatcher = AlertDispatcher::new(config.alerts.clone(), gateway);
    let fatigue = FatigueStateMachine::new(config.dms.fatigue_threshold());

    info!("Camera: {}", camera.url());
    info!(
        "Fatigue threshold: {:.1}s, alert cooldown: {:.1}s, gateway: {}, frame skip: {}",
        fatigue.threshold().as_secs_f64(),
        dispatcher.config().cooldown().as_secs_f64(),
        dispatcher.gateway_name(),
        config.pipeline.frame_skip
    );

    let mut presenters: Vec<Box<dyn Presenter + Send>> = vec![Box::new(LogPresenter::new())];
    if let Some(snapshot_path) = &config.pipeline.snapshot_path {
        presenters.push(Box::new(SnapshotPresenter::new(snapshot_path.clone())));
    }

    let mut driver = PipelineDriver::new(
        camera,
        analyzer,
        fatigue,
        dispatcher,
        presenters,
        config.pipeline.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for Ctrl+C: {}", e);
                // Keep the sender alive so the loop is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    info!("Monitoring started, press Ctrl+C to stop");
    let summary = driver.run(stop_rx).await;
    info!("Total alerts sent: {}", summary.alerts_sent);

    Ok(())
}
