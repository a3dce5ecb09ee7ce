//! Failure notifications.
//!
//! When a feed exhausts its retries the owner is told once that automatic
//! updating stopped. Delivery is best-effort: a failed notification is
//! logged and never changes the outcome of the sync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::db::{parse_datetime, Database, DbPool};
use crate::Result;

/// Subject of the failure notification.
pub const FAILURE_SUBJECT: &str = "Feed update failed";

/// Body template of the failure notification.
pub const FAILURE_BODY: &str =
    "Hi {username}, System failed to update this feed ({url}) and auto updating is disabled for this feed.";

/// A feed that was disabled after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNotice {
    pub owner_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub feed_id: i64,
    pub feed_url: String,
    /// Error of the last attempt.
    pub reason: String,
}

impl FailureNotice {
    pub fn subject(&self) -> &'static str {
        FAILURE_SUBJECT
    }

    /// Render the message addressed to the owner.
    pub fn body(&self) -> String {
        FAILURE_BODY
            .replace("{username}", &self.username)
            .replace("{url}", &self.feed_url)
    }
}

/// Delivers failure notices to feed owners.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &FailureNotice) -> Result<()>;
}

/// Writes notices to the `notifications` outbox for later delivery.
///
/// Rows addressed to an owner with an email are sent by
/// [`OutboxDelivery`](super::mailer::OutboxDelivery).
#[derive(Debug, Clone)]
pub struct StoredNotifier {
    db: Database,
}

impl StoredNotifier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for StoredNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<()> {
        NotificationRepository::new(self.db.pool()).create(notice).await?;
        Ok(())
    }
}

/// Only logs notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &FailureNotice) -> Result<()> {
        warn!(
            owner = %notice.username,
            feed_id = notice.feed_id,
            url = %notice.feed_url,
            reason = %notice.reason,
            "{}",
            notice.body()
        );
        Ok(())
    }
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: i64,
    pub owner_id: i64,
    pub feed_id: Option<i64>,
    pub feed_url: String,
    /// Owner's email at the time the notice was queued.
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Error of the last failed delivery.
    pub last_error: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    owner_id: i64,
    feed_id: Option<i64>,
    feed_url: String,
    recipient: Option<String>,
    subject: String,
    body: String,
    created_at: String,
    sent_at: Option<String>,
    last_error: Option<String>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            owner_id: row.owner_id,
            feed_id: row.feed_id,
            feed_url: row.feed_url,
            recipient: row.recipient,
            subject: row.subject,
            body: row.body,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            sent_at: row.sent_at.and_then(|s| parse_datetime(&s)),
            last_error: row.last_error,
        }
    }
}

/// Repository for the notification outbox.
pub struct NotificationRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> NotificationRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Queue a notice, returning the notification ID.
    pub async fn create(&self, notice: &FailureNotice) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (owner_id, feed_id, feed_url, recipient, subject, body)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(notice.owner_id)
        .bind(notice.feed_id)
        .bind(&notice.feed_url)
        .bind(notice.email.as_deref().map(str::trim).filter(|e| !e.is_empty()))
        .bind(notice.subject())
        .bind(notice.body())
        .fetch_one(self.pool)
        .await?;
        Ok(id)
    }

    /// Notifications not yet delivered, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, owner_id, feed_id, feed_url, recipient, subject, body,
                   created_at, sent_at, last_error
            FROM notifications
            WHERE sent_at IS NULL
            ORDER BY id ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    /// Pending notifications with a recipient address and an ID above
    /// `after_id`, oldest first.
    pub async fn list_deliverable(&self, after_id: i64, limit: usize) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, owner_id, feed_id, feed_url, recipient, subject, body,
                   created_at, sent_at, last_error
            FROM notifications
            WHERE sent_at IS NULL AND recipient IS NOT NULL AND id > ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    /// Number of notifications ever queued for a feed.
    pub async fn count_for_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Mark a notification as delivered.
    pub async fn mark_sent(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET sent_at = ? WHERE id = ? AND sent_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Keep a notification pending and remember why delivery failed.
    pub async fn record_delivery_error(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE notifications SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRepository;

    fn notice(owner_id: i64) -> FailureNotice {
        FailureNotice {
            owner_id,
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            feed_id: 42,
            feed_url: "https://example.com/rss".to_string(),
            reason: "unreachable: timed out".to_string(),
        }
    }

    #[test]
    fn test_body_names_owner_and_feed() {
        assert_eq!(
            notice(1).body(),
            "Hi alice, System failed to update this feed (https://example.com/rss) \
             and auto updating is disabled for this feed."
        );
    }

    #[tokio::test]
    async fn test_stored_notifier_queues_notice() {
        let db = Database::open_in_memory().await.unwrap();
        let owner = UserRepository::new(db.pool()).create("alice", None).await.unwrap();

        StoredNotifier::new(db.clone()).notify(&notice(owner.id)).await.unwrap();

        let repo = NotificationRepository::new(db.pool());
        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, FAILURE_SUBJECT);
        assert_eq!(pending[0].feed_id, Some(42));
        assert_eq!(pending[0].recipient.as_deref(), Some("alice@example.com"));
        assert!(pending[0].body.contains("https://example.com/rss"));
        assert_eq!(repo.count_for_feed(42).await.unwrap(), 1);

        assert!(repo.mark_sent(pending[0].id).await.unwrap());
        assert!(!repo.mark_sent(pending[0].id).await.unwrap());
        assert!(repo.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notice_without_email_is_not_deliverable() {
        let db = Database::open_in_memory().await.unwrap();
        let owner = UserRepository::new(db.pool()).create("bob", None).await.unwrap();
        let repo = NotificationRepository::new(db.pool());

        let mut no_email = notice(owner.id);
        no_email.email = None;
        repo.create(&no_email).await.unwrap();
        let mut blank = notice(owner.id);
        blank.email = Some("  ".to_string());
        repo.create(&blank).await.unwrap();
        let mailed = repo.create(&notice(owner.id)).await.unwrap();

        assert_eq!(repo.list_pending().await.unwrap().len(), 3);
        let deliverable = repo.list_deliverable(0, 10).await.unwrap();
        assert_eq!(deliverable.len(), 1);
        assert_eq!(deliverable[0].id, mailed);

        repo.record_delivery_error(mailed, "relay refused").await.unwrap();
        let deliverable = repo.list_deliverable(0, 10).await.unwrap();
        assert_eq!(deliverable[0].last_error.as_deref(), Some("relay refused"));
        assert!(deliverable[0].sent_at.is_none());
        assert!(repo.list_deliverable(mailed, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify(&notice(1)).await.is_ok());
    }
}
