//! Alert Dispatcher Implementation

use crate::gateway::{AlertMessage, GatewayError, GatewayKind, NotificationGateway, TwilioConfig};
use chrono::Local;
use dms::FatigueVerdict;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum time between two dispatches (seconds, default: 10)
    pub cooldown_secs: f64,
    pub gateway: GatewayKind,
    /// Number that receives alerts
    pub recipient: String,
    /// Number alerts are sent from
    pub sender: String,
    pub twilio: TwilioConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10.0,
            gateway: GatewayKind::Log,
            recipient: String::new(),
            sender: String::new(),
            twilio: TwilioConfig::default(),
        }
    }
}

impl AlertConfig {
    /// Cooldown as a duration; saturates for values `validate` rejects
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.cooldown_secs.is_finite() || self.cooldown_secs <= 0.0 {
            return Err(GatewayError::Config(format!(
                "cooldown_secs must be positive, got {}",
                self.cooldown_secs
            )));
        }
        if Duration::try_from_secs_f64(self.cooldown_secs).is_err() {
            return Err(GatewayError::Config(format!(
                "cooldown_secs {} is out of range",
                self.cooldown_secs
            )));
        }
        if self.gateway == GatewayKind::Twilio {
            if self.recipient.is_empty() || self.sender.is_empty() {
                return Err(GatewayError::Config(
                    "twilio gateway needs recipient and sender".to_string(),
                ));
            }
            if self.twilio.account_sid.is_empty() || self.twilio.auth_token.is_empty() {
                return Err(GatewayError::Config(
                    "twilio gateway needs account_sid and auth_token".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Dispatcher bookkeeping, written only from the frame loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    /// Last dispatch (never, initially)
    pub last_alert_at: Option<Instant>,
    /// Set on dispatch, cleared when eyes are observed again
    pub alert_outstanding: bool,
    /// Sends confirmed by the gateway
    pub total_alerts_sent: u64,
    pub failed_sends: u64,
    /// Sends launched
    pub dispatched: u64,
}

/// What `on_verdict` did with a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing to do
    Idle,
    /// Send launched
    Dispatched,
    /// Rising edge while an alert for this episode is still outstanding
    SuppressedOutstanding,
    /// Rising edge inside the cooldown window
    SuppressedCooldown,
    /// Falling edge cleared an outstanding alert
    Rearmed,
}

/// Result of one completed send
#[derive(Debug)]
pub struct SendReport {
    pub dispatched_at: Instant,
    pub result: Result<String, GatewayError>,
}

/// Edge-triggered alert dispatch with fire-and-forget sends
pub struct AlertDispatcher<G> {
    config: AlertConfig,
    gateway: Arc<G>,
    state: AlertState,
    in_flight: usize,
    report_tx: mpsc::UnboundedSender<SendReport>,
    report_rx: mpsc::UnboundedReceiver<SendReport>,
}

impl<G: NotificationGateway> AlertDispatcher<G> {
    pub fn new(config: AlertConfig, gateway: G) -> Self {
        info!(
            "Alert dispatcher ready (gateway: {}, cooldown: {:.1}s)",
            gateway.name(),
            config.cooldown_secs
        );
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            config,
            gateway: Arc::new(gateway),
            state: AlertState::default(),
            in_flight: 0,
            report_tx,
            report_rx,
        }
    }

    /// Apply one fatigue verdict.
    ///
    /// Must be called from inside a Tokio runtime: a dispatch spawns the send
    /// and returns without waiting for it.
    pub fn on_verdict(&mut self, verdict: &FatigueVerdict, now: Instant) -> DispatchOutcome {
        if verdict.falling_edge {
            if self.state.alert_outstanding {
                self.state.alert_outstanding = false;
                info!("Driver state normalized, alerts re-armed");
                return DispatchOutcome::Rearmed;
            }
            return DispatchOutcome::Idle;
        }

        if !verdict.rising_edge {
            return DispatchOutcome::Idle;
        }

        if self.state.alert_outstanding {
            debug!("Alert suppressed: previous alert still outstanding");
            return DispatchOutcome::SuppressedOutstanding;
        }

        if let Some(last) = self.state.last_alert_at {
            let since = now.saturating_duration_since(last);
            if since < self.config.cooldown() {
                debug!(
                    "Alert suppressed: {:.1}s since last alert (cooldown {:.1}s)",
                    since.as_secs_f64(),
                    self.config.cooldown_secs
                );
                return DispatchOutcome::SuppressedCooldown;
            }
        }

        // Marked before the send completes so a slow send cannot double up
        self.state.last_alert_at = Some(now);
        self.state.alert_outstanding = true;
        self.state.dispatched += 1;
        self.spawn_send(now);

        info!("FATIGUE DETECTED - sending alert #{}", self.state.dispatched);
        DispatchOutcome::Dispatched
    }

    fn spawn_send(&mut self, dispatched_at: Instant) {
        let message =
            AlertMessage::fatigue(&self.config.recipient, &self.config.sender, Local::now());
        let gateway = Arc::clone(&self.gateway);
        let reports = self.report_tx.clone();
        self.in_flight += 1;

        tokio::spawn(async move {
            let result = gateway.send(&message).await;
            // Receiver gone means the dispatcher was dropped
            let _ = reports.send(SendReport {
                dispatched_at,
                result,
            });
        });
    }

    fn apply(&mut self, report: &SendReport) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match &report.result {
            Ok(id) => {
                self.state.total_alerts_sent += 1;
                info!(
                    "Alert delivered (id: {}), total alerts sent: {}",
                    id, self.state.total_alerts_sent
                );
            }
            Err(e) => {
                self.state.failed_sends += 1;
                error!("Alert send failed: {}", e);
            }
        }
    }

    /// Fold finished sends into the counters without waiting
    pub fn collect_completed(&mut self) -> Vec<SendReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.report_rx.try_recv() {
            self.apply(&report);
            reports.push(report);
        }
        reports
    }

    /// Wait up to `grace` for in-flight sends; unfinished sends are left running
    pub async fn wait_for_in_flight(&mut self, grace: Duration) -> Vec<SendReport> {
        let mut reports = self.collect_completed();
        let deadline = tokio::time::Instant::now() + grace;

        while self.in_flight > 0 {
            match tokio::time::timeout_at(deadline, self.report_rx.recv()).await {
                Ok(Some(report)) => {
                    self.apply(&report);
                    reports.push(report);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} alert send(s) still in flight after {:?}",
                        self.in_flight, grace
                    );
                    break;
                }
            }
        }
        reports
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// Records messages; optionally fails or stalls
    #[derive(Default)]
    struct FakeGateway {
        sent: Arc<Mutex<Vec<AlertMessage>>>,
        fail: bool,
        stall: Option<Duration>,
    }

    impl NotificationGateway for FakeGateway {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn send(&self, message: &AlertMessage) -> Result<String, GatewayError> {
            if let Some(delay) = self.stall {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(GatewayError::Transport("connection reset".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(message.clone());
            Ok(format!("SM{}", sent.len()))
        }
    }

    fn config() -> AlertConfig {
        AlertConfig {
            recipient: "+15550001111".to_string(),
            sender: "+15550002222".to_string(),
            ..Default::default()
        }
    }

    fn rising() -> FatigueVerdict {
        FatigueVerdict {
            fatigue_now: true,
            rising_edge: true,
            ..Default::default()
        }
    }

    fn falling() -> FatigueVerdict {
        FatigueVerdict {
            falling_edge: true,
            ..Default::default()
        }
    }

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    #[test]
    fn test_config_validation() {
        assert!(AlertConfig::default().validate().is_ok());

        let bad = AlertConfig {
            cooldown_secs: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let twilio = AlertConfig {
            gateway: GatewayKind::Twilio,
            ..config()
        };
        assert!(twilio.validate().is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_cooldown() {
        let huge = AlertConfig {
            cooldown_secs: 1e30,
            ..config()
        };
        assert!(matches!(huge.validate(), Err(GatewayError::Config(_))));
        assert_eq!(huge.cooldown(), Duration::MAX);

        // Gating with an unvalidated config still must not panic
        let mut dispatcher = AlertDispatcher::new(huge, FakeGateway::default());
        let base = Instant::now();
        assert_eq!(dispatcher.on_verdict(&rising(), base), DispatchOutcome::Dispatched);
        assert_eq!(dispatcher.on_verdict(&falling(), secs(base, 1)), DispatchOutcome::Rearmed);
        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 3600)),
            DispatchOutcome::SuppressedCooldown
        );
        assert_eq!(dispatcher.config().cooldown(), Duration::MAX);
        assert_eq!(dispatcher.gateway_name(), "fake");
    }

    #[tokio::test]
    async fn test_rising_edge_dispatches() {
        let gateway = FakeGateway::default();
        let sent = Arc::clone(&gateway.sent);
        let mut dispatcher = AlertDispatcher::new(config(), gateway);
        let now = Instant::now();

        assert_eq!(dispatcher.on_verdict(&rising(), now), DispatchOutcome::Dispatched);
        let state = dispatcher.state();
        assert!(state.alert_outstanding);
        assert_eq!(state.last_alert_at, Some(now));
        assert_eq!(state.total_alerts_sent, 0);

        let reports = dispatcher.wait_for_in_flight(Duration::from_secs(1)).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result.as_ref().unwrap(), "SM1");
        assert_eq!(dispatcher.state().total_alerts_sent, 1);
        assert_eq!(dispatcher.in_flight(), 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].to, "+15550001111");
        assert_eq!(sent[0].from, "+15550002222");
    }

    #[tokio::test]
    async fn test_non_edges_are_idle() {
        let mut dispatcher = AlertDispatcher::new(config(), FakeGateway::default());
        let steady = FatigueVerdict {
            fatigue_now: true,
            ..Default::default()
        };

        assert_eq!(dispatcher.on_verdict(&steady, Instant::now()), DispatchOutcome::Idle);
        assert_eq!(dispatcher.on_verdict(&falling(), Instant::now()), DispatchOutcome::Idle);
        assert_eq!(dispatcher.state(), AlertState::default());
    }

    #[tokio::test]
    async fn test_outstanding_blocks_resend() {
        let mut dispatcher = AlertDispatcher::new(config(), FakeGateway::default());
        let base = Instant::now();

        assert_eq!(dispatcher.on_verdict(&rising(), base), DispatchOutcome::Dispatched);
        // Eyes still absent at t=5 and past the cooldown
        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 5)),
            DispatchOutcome::SuppressedOutstanding
        );
        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 15)),
            DispatchOutcome::SuppressedOutstanding
        );
        assert_eq!(dispatcher.state().dispatched, 1);
    }

    #[tokio::test]
    async fn test_cooldown_after_rearm() {
        let mut dispatcher = AlertDispatcher::new(config(), FakeGateway::default());
        let base = Instant::now();

        assert_eq!(dispatcher.on_verdict(&rising(), base), DispatchOutcome::Dispatched);
        assert_eq!(dispatcher.on_verdict(&falling(), secs(base, 2)), DispatchOutcome::Rearmed);
        assert!(!dispatcher.state().alert_outstanding);

        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 5)),
            DispatchOutcome::SuppressedCooldown
        );
        assert_eq!(dispatcher.on_verdict(&falling(), secs(base, 6)), DispatchOutcome::Idle);
        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 10)),
            DispatchOutcome::Dispatched
        );
        assert_eq!(dispatcher.state().last_alert_at, Some(secs(base, 10)));
    }

    #[tokio::test]
    async fn test_failed_send_keeps_outstanding() {
        let gateway = FakeGateway {
            fail: true,
            ..Default::default()
        };
        let mut dispatcher = AlertDispatcher::new(config(), gateway);
        let base = Instant::now();

        dispatcher.on_verdict(&rising(), base);
        let reports = dispatcher.wait_for_in_flight(Duration::from_secs(1)).await;
        assert!(reports[0].result.is_err());

        let state = dispatcher.state();
        assert_eq!(state.failed_sends, 1);
        assert_eq!(state.total_alerts_sent, 0);
        assert!(state.alert_outstanding);
        // No retry inside the same episode
        assert_eq!(
            dispatcher.on_verdict(&rising(), secs(base, 20)),
            DispatchOutcome::SuppressedOutstanding
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_does_not_block() {
        let gateway = FakeGateway {
            stall: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let mut dispatcher = AlertDispatcher::new(config(), gateway);

        assert_eq!(
            dispatcher.on_verdict(&rising(), Instant::now()),
            DispatchOutcome::Dispatched
        );
        assert!(dispatcher.collect_completed().is_empty());
        assert_eq!(dispatcher.in_flight(), 1);

        let reports = dispatcher.wait_for_in_flight(Duration::from_secs(2)).await;
        assert!(reports.is_empty());
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.state().total_alerts_sent, 0);
    }

    proptest! {
        #[test]
        fn prop_cooldown_and_one_alert_per_episode(
            steps in prop::collection::vec((0u8..3, 0u64..8000), 1..150)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let _guard = runtime.enter();

            let mut dispatcher = AlertDispatcher::new(config(), FakeGateway::default());
            let base = Instant::now();
            let mut t = 0u64;
            let mut last_dispatch: Option<u64> = None;
            let mut rearmed_since_dispatch = true;

            for (kind, gap) in steps {
                t += gap;
                let verdict = match kind {
                    0 => rising(),
                    1 => falling(),
                    _ => FatigueVerdict::default(),
                };

                match dispatcher.on_verdict(&verdict, base + Duration::from_millis(t)) {
                    DispatchOutcome::Dispatched => {
                        if let Some(prev) = last_dispatch {
                            prop_assert!(t - prev >= 10_000);
                        }
                        prop_assert!(rearmed_since_dispatch);
                        last_dispatch = Some(t);
                        rearmed_since_dispatch = false;
                    }
                    DispatchOutcome::Rearmed => rearmed_since_dispatch = true,
                    _ => {}
                }
            }
        }
    }
}
