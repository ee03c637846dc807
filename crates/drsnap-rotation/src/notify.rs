//! Operator notifications.
//!
//! Every message is logged through `tracing`. Warnings and alerts are also
//! pushed to chat destinations when configured; delivery failures are logged
//! and never propagated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RotationConfig;

/// Sender name shown on webhook messages.
pub const NOTIFIER_USERNAME: &str = "RDSSnapshotCopier";
/// Sender icon shown on webhook messages.
pub const NOTIFIER_ICON: &str = ":robot_face:";

/// Delivery failures. Logged by [`Alerter`], never propagated.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never got a response.
    #[error("notification transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("notification rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Logged only.
    Info,
    /// Logged and sent to the warnings channel.
    Warning,
    /// Logged and sent to the alerts channel.
    Alert,
}

impl Severity {
    /// Message prefix for this severity.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Alert => "ERR",
        }
    }
}

/// Render `LEVEL: [instance] message`, or `LEVEL: message` without an instance.
pub fn format_message(severity: Severity, instance_id: Option<&str>, msg: &str) -> String {
    match instance_id {
        Some(id) => format!("{}: [{}] {}", severity.label(), id, msg),
        None => format!("{}: {}", severity.label(), msg),
    }
}

/// Delivers a text message to a named destination (a chat channel).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `destination`.
    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError>;
}

/// JSON body of an incoming-webhook post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackPayload {
    /// Sender name.
    pub username: String,
    /// Sender icon.
    pub icon_emoji: String,
    /// Target channel.
    pub channel: String,
    /// Message text.
    pub text: String,
}

impl SlackPayload {
    /// Payload with the standard sender name and icon.
    pub fn new(channel: &str, text: &str) -> Self {
        Self {
            username: NOTIFIER_USERNAME.to_string(),
            icon_emoji: NOTIFIER_ICON.to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
        }
    }
}

/// Slack incoming-webhook notifier.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// Notifier posting to `webhook_url` with a per-request timeout.
    pub fn new(webhook_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&SlackPayload::new(destination, text))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Logs at the right level and relays warnings/alerts to their channels.
#[derive(Clone, Default)]
pub struct Alerter {
    notifier: Option<Arc<dyn Notifier>>,
    warnings_channel: Option<String>,
    alerts_channel: Option<String>,
}

impl Alerter {
    /// Route warnings and alerts through `notifier`. A channel left unset
    /// disables delivery for that severity.
    pub fn new(
        notifier: Option<Arc<dyn Notifier>>,
        warnings_channel: Option<String>,
        alerts_channel: Option<String>,
    ) -> Self {
        Self {
            notifier,
            warnings_channel,
            alerts_channel,
        }
    }

    /// Log-only alerter.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Slack delivery when a webhook URL is configured, log-only otherwise.
    pub fn from_config(config: &RotationConfig) -> Self {
        let notifier = config
            .slack_webhook_url
            .as_ref()
            .map(|url| Arc::new(SlackNotifier::new(url.clone(), 10)) as Arc<dyn Notifier>);
        Self::new(
            notifier,
            config.slack_warnings_channel.clone(),
            config.slack_alerts_channel.clone(),
        )
    }

    /// Log at info level. Never relayed.
    pub fn info(&self, instance_id: Option<&str>, msg: &str) {
        match instance_id {
            Some(id) => info!(instance_id = id, "{}", msg),
            None => info!("{}", msg),
        }
    }

    /// Log at warn level and relay to the warnings channel.
    pub async fn warning(&self, instance_id: Option<&str>, msg: &str) {
        match instance_id {
            Some(id) => warn!(instance_id = id, "{}", msg),
            None => warn!("{}", msg),
        }
        self.relay(self.warnings_channel.as_deref(), Severity::Warning, instance_id, msg)
            .await;
    }

    /// Log at error level and relay to the alerts channel.
    pub async fn alert(&self, instance_id: Option<&str>, msg: &str) {
        match instance_id {
            Some(id) => error!(instance_id = id, "{}", msg),
            None => error!("{}", msg),
        }
        self.relay(self.alerts_channel.as_deref(), Severity::Alert, instance_id, msg)
            .await;
    }

    async fn relay(
        &self,
        channel: Option<&str>,
        severity: Severity,
        instance_id: Option<&str>,
        msg: &str,
    ) {
        let (Some(notifier), Some(channel)) = (self.notifier.as_ref(), channel) else {
            return;
        };
        let text = format_message(severity, instance_id, msg);
        if let Err(e) = notifier.send(channel, &text).await {
            match instance_id {
                Some(id) => error!(instance_id = id, error = %e, "failed to send notification: {}", text),
                None => error!(error = %e, "failed to send notification: {}", text),
            }
        }
    }
}
