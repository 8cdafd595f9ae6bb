//! Slack webhook notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::expand_env;
use crate::error::Result;
use crate::models::UnitStatus;

use super::{NotificationError, Notifier};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Slack notifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL
    pub webhook: String,
    /// Destination channel
    #[serde(default)]
    pub channel: String,
    /// Message text; `$VAR` / `${VAR}` are expanded on every send
    #[serde(default)]
    pub message: String,
    /// Emoji used as the bot icon
    #[serde(default)]
    pub icon_emoji: String,
}

/// Posts each batch as one Slack message with a field per unit
pub struct SlackNotifier {
    config: SlackConfig,
    client: Client,
}

impl SlackNotifier {
    /// Create a new Slack notifier
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    fn payload(&self, units: &[UnitStatus]) -> SlackPayload {
        let fields = units
            .iter()
            .map(|unit| SlackField {
                title: unit.name.clone(),
                value: unit.state_summary(),
                short: false,
            })
            .collect();

        SlackPayload {
            channel: Some(self.config.channel.clone()).filter(|c| !c.is_empty()),
            icon_emoji: Some(self.config.icon_emoji.clone()).filter(|e| !e.is_empty()),
            text: expand_env(&self.config.message),
            fields,
        }
    }

    async fn send(&self, units: &[UnitStatus]) -> std::result::Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.config.webhook)
            .json(&self.payload(units))
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Slack returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn alert(&self, units: &[UnitStatus]) {
        match self.send(units).await {
            Ok(()) => debug!(channel = %self.config.channel, units = units.len(), "Slack notification sent"),
            Err(e) => error!(channel = %self.config.channel, error = %e, "Failed to send Slack notification"),
        }
    }
}

#[derive(Debug, Serialize)]
struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<String>,
    text: String,
    fields: Vec<SlackField>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
