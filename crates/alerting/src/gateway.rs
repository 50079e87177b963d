//! Notification gateways

use chrono::{DateTime, Local};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Gateway failure (reported asynchronously, never raised into the frame loop)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Gateway rejected credentials (HTTP {0})")]
    Auth(u16),

    #[error("Gateway rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected gateway response: {0}")]
    Response(String),

    #[error("Gateway configuration error: {0}")]
    Config(String),
}

/// One outgoing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// Destination number
    pub to: String,
    /// Sender number
    pub from: String,
    pub body: String,
}

impl AlertMessage {
    /// Fatigue alert stamped with the local wall-clock time
    pub fn fatigue(to: &str, from: &str, at: DateTime<Local>) -> Self {
        Self {
            to: to.to_string(),
            from: from.to_string(),
            body: format!(
                "FATIGUE ALERT DETECTED\nTime: {}\nStay alert while driving.",
                at.format("%H:%M:%S")
            ),
        }
    }
}

/// Accepts a message and returns the gateway's send identifier
pub trait NotificationGateway: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn send(
        &self,
        message: &AlertMessage,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// Which gateway the binary builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    #[default]
    Log,
    Twilio,
}

/// Twilio account settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// API root, overridable for testing
    pub base_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            base_url: "https://api.twilio.com".to_string(),
        }
    }
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

/// SMS delivery through the Twilio Messages API
pub struct TwilioGateway {
    client: Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Result<Self, GatewayError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(GatewayError::Config(
                "twilio gateway needs account_sid and auth_token".to_string(),
            ));
        }

        // No request timeout: sends run off the frame loop
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

impl NotificationGateway for TwilioGateway {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, GatewayError> {
        let url = self.messages_url();
        debug!("Posting SMS to {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", message.to.as_str()),
                ("From", message.from.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let created: MessageResource =
            serde_json::from_str(&text).map_err(|e| GatewayError::Response(e.to_string()))?;

        Ok(created.sid)
    }
}

/// Dry-run gateway: logs the message instead of sending it
#[derive(Debug, Default)]
pub struct LogGateway {
    sent: AtomicU64,
}

impl LogGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationGateway for LogGateway {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, GatewayError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "[dry-run] SMS to {} from {}: {}",
            message.to,
            message.from,
            message.body.replace('\n', " | ")
        );
        Ok(format!("log-{}", n))
    }
}

/// Gateway selected at startup
pub enum Gateway {
    Log(LogGateway),
    Twilio(TwilioGateway),
}

impl Gateway {
    pub fn from_config(kind: GatewayKind, twilio: &TwilioConfig) -> Result<Self, GatewayError> {
        match kind {
            GatewayKind::Log => Ok(Self::Log(LogGateway::new())),
            GatewayKind::Twilio => Ok(Self::Twilio(TwilioGateway::new(twilio.clone())?)),
        }
    }
}

impl NotificationGateway for Gateway {
    fn name(&self) -> &'static str {
        match self {
            Self::Log(g) => g.name(),
            Self::Twilio(g) => g.name(),
        }
    }

    async fn send(&self, message: &AlertMessage) -> Result<String, GatewayError> {
        match self {
            Self::Log(g) => g.send(message).await,
            Self::Twilio(g) => g.send(message).await,
        }
    }
}
