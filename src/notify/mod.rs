//! Notification sinks

mod email;
mod html;

pub use email::EmailNotifier;
pub use html::json_to_html;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::common::errors::{RebalanceError, RebalanceResult};
use crate::common::traits::Notifier;
use crate::common::types::Notification;
use crate::config::types::NotifierConfig;

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> RebalanceResult<()> {
        match &notification.recipient {
            Some(recipient) => info!(
                "Notification to {}: {} | {}",
                recipient, notification.subject, notification.body
            ),
            None => warn!(
                "Admin notification: {} | {}",
                notification.subject, notification.body
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

/// Posts every notification as JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    admin_recipient: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, admin_recipient: &str, timeout: Duration) -> RebalanceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RebalanceError::Notification(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            admin_recipient: admin_recipient.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(subject = %notification.subject))]
    async fn notify(&self, notification: &Notification) -> RebalanceResult<()> {
        let payload = WebhookPayload {
            to: notification
                .recipient
                .as_deref()
                .unwrap_or(&self.admin_recipient),
            subject: &notification.subject,
            body: &notification.body,
            html: notification.html_body.as_deref(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RebalanceError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RebalanceError::Notification(format!(
                "Webhook returned status {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Pick the notifier the configuration asks for
///
/// SMTP wins over the webhook; with neither, notifications are logged.
pub fn from_config(config: &NotifierConfig, timeout: Duration) -> RebalanceResult<Box<dyn Notifier>> {
    let admin = || {
        config.admin_recipient.as_deref().ok_or_else(|| {
            RebalanceError::Configuration(
                "notifier.admin_recipient is required to deliver notifications".to_string(),
            )
        })
    };
    if let Some(smtp) = &config.smtp {
        return Ok(Box::new(EmailNotifier::smtp(smtp, admin()?, timeout)?));
    }
    match &config.webhook_url {
        Some(url) => Ok(Box::new(WebhookNotifier::new(url, admin()?, timeout)?)),
        None => Ok(Box::new(LogNotifier)),
    }
}
