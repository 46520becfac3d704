//! SMTP delivery

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::common::errors::{RebalanceError, RebalanceResult};
use crate::common::traits::Notifier;
use crate::common::types::Notification;
use crate::config::types::SmtpConfig;

fn mailbox(address: &str) -> RebalanceResult<Mailbox> {
    address
        .parse()
        .map_err(|e| RebalanceError::Configuration(format!("invalid address '{}': {}", address, e)))
}

/// Sends notifications as e-mail, with an HTML alternative when present
pub struct EmailNotifier<T> {
    transport: T,
    from: Mailbox,
    admin: Mailbox,
}

impl<T> EmailNotifier<T> {
    pub fn new(transport: T, from: &str, admin: &str) -> RebalanceResult<Self> {
        Ok(Self {
            transport,
            from: mailbox(from)?,
            admin: mailbox(admin)?,
        })
    }

    fn message(&self, notification: &Notification) -> RebalanceResult<Message> {
        let to = match &notification.recipient {
            Some(recipient) => mailbox(recipient)?,
            None => self.admin.clone(),
        };
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.as_str());

        let message = match &notification.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                notification.body.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(notification.body.clone()),
        };
        message.map_err(|e| RebalanceError::Notification(e.to_string()))
    }
}

impl EmailNotifier<AsyncSmtpTransport<Tokio1Executor>> {
    /// Implicit TLS relay with login credentials
    pub fn smtp(config: &SmtpConfig, admin: &str, timeout: Duration) -> RebalanceResult<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| RebalanceError::Configuration(format!("smtp relay {}: {}", config.host, e)))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();
        Self::new(transport, &config.from, admin)
    }
}

#[async_trait]
impl<T> Notifier for EmailNotifier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: Display,
{
    #[instrument(skip(self, notification), fields(subject = %notification.subject))]
    async fn notify(&self, notification: &Notification) -> RebalanceResult<()> {
        let message = self.message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| RebalanceError::Notification(format!("smtp delivery failed: {}", e)))?;
        debug!("Mail sent");
        Ok(())
    }
}
