//! Alerting System
//!
//! Turns fatigue verdicts into out-of-band notifications:
//! - cooldown and one-alert-per-episode gating
//! - fire-and-forget sends that never block the frame loop
//! - SMS (Twilio) and log-only gateways

mod dispatcher;
mod gateway;

pub use dispatcher::{AlertConfig, AlertDispatcher, AlertState, DispatchOutcome, SendReport};
pub use gateway::{
    AlertMessage, Gateway, GatewayError, GatewayKind, LogGateway, NotificationGateway,
    TwilioConfig, TwilioGateway,
};
