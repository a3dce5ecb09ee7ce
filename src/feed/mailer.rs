//! Mail delivery of queued failure notifications.
//!
//! [`StoredNotifier`](super::notifier::StoredNotifier) only queues notices.
//! [`OutboxDelivery`] drains the queue through a [`Mailer`], marking each row
//! sent on success and keeping it pending with its error otherwise.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::notifier::{Notification, NotificationRepository};
use crate::config::MailConfig;
use crate::db::Database;
use crate::{FeedsyncError, Result};

/// Rows fetched per delivery pass.
const DELIVERY_BATCH: usize = 100;

/// Sends plain-text mail through a lettre transport.
pub struct Mailer<T = AsyncSmtpTransport<Tokio1Executor>> {
    transport: T,
    from: Mailbox,
}

impl Mailer {
    /// SMTP mailer from the `[mail]` section.
    ///
    /// With `starttls` the connection is upgraded on the submission port,
    /// otherwise it uses implicit TLS.
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        }
        .map_err(|e| FeedsyncError::Config(format!("invalid SMTP relay {}: {e}", config.smtp_host)))?;

        let mut builder = builder.port(config.smtp_port);
        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        let from = sender(&config.from_name, &config.from_address)?;
        Ok(Self::with_transport(builder.build(), from))
    }
}

impl<T> Mailer<T> {
    pub fn with_transport(transport: T, from: Mailbox) -> Self {
        Self { transport, from }
    }

    /// Build the message for one recipient.
    pub fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message> {
        let to: Mailbox = to
            .trim()
            .parse()
            .map_err(|e| FeedsyncError::Notify(format!("invalid recipient {to}: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| FeedsyncError::Notify(format!("failed to build message: {e}")))
    }
}

impl<T> Mailer<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let message = self.build_message(to, subject, body)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| FeedsyncError::Notify(format!("failed to send mail to {to}: {e}")))?;
        Ok(())
    }
}

/// Sender mailbox from a display name and an address.
pub fn sender(name: &str, address: &str) -> Result<Mailbox> {
    let address: Address = address
        .trim()
        .parse()
        .map_err(|e| FeedsyncError::Config(format!("invalid sender address {address}: {e}")))?;
    let name = name.trim();
    Ok(Mailbox::new((!name.is_empty()).then(|| name.to_string()), address))
}

/// Counts of one delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    /// Rows left pending after a send error.
    pub failed: usize,
}

/// Sends queued notifications.
pub struct OutboxDelivery<T = AsyncSmtpTransport<Tokio1Executor>> {
    db: Database,
    mailer: Mailer<T>,
}

impl<T> OutboxDelivery<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    pub fn new(db: Database, mailer: Mailer<T>) -> Self {
        Self { db, mailer }
    }

    /// Send every deliverable notification once.
    ///
    /// A row that fails keeps `sent_at` unset and is tried again on the next
    /// pass.
    pub async fn deliver_pending(&self) -> Result<DeliveryReport> {
        let repo = NotificationRepository::new(self.db.pool());
        let mut report = DeliveryReport::default();
        let mut last_id = 0;

        loop {
            let batch: Vec<Notification> = repo.list_deliverable(last_id, DELIVERY_BATCH).await?;
            if batch.is_empty() {
                break;
            }

            for notification in batch {
                last_id = notification.id;
                let Some(recipient) = notification.recipient.as_deref() else {
                    continue;
                };

                match self
                    .mailer
                    .send(recipient, &notification.subject, &notification.body)
                    .await
                {
                    Ok(()) => {
                        repo.mark_sent(notification.id).await?;
                        debug!(notification_id = notification.id, recipient, "notification sent");
                        report.sent += 1;
                    }
                    Err(e) => {
                        warn!(notification_id = notification.id, "{}", e);
                        repo.record_delivery_error(notification.id, &e.to_string())
                            .await?;
                        report.failed += 1;
                    }
                }
            }
        }

        if report.sent > 0 || report.failed > 0 {
            info!(sent = report.sent, failed = report.failed, "Delivered notifications");
        }
        Ok(report)
    }

    /// Deliver pending notifications every `every` until cancelled.
    pub async fn run(&self, every: Duration) {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            if let Err(e) = self.deliver_pending().await {
                error!("Failed to deliver notifications: {}", e);
            }
        }
    }
}
