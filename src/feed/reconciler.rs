//! Merge parsed documents into the store.

use chrono::Utc;
use tracing::debug;

use super::repository::{FeedRepository, ItemRepository, UpsertResult};
use super::types::{NewFeed, ParsedFeed};
use crate::db::DbPool;
use crate::{FeedsyncError, Result};

/// Counts of item rows affected by one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ReconcileStats {
    /// Number of item rows written.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Applies parsed documents to stored feeds.
///
/// Every call runs in one transaction, so a failure leaves the feed as it
/// was and a repeat of the same document is harmless.
pub struct Reconciler<'a> {
    pool: &'a DbPool,
}

impl<'a> Reconciler<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Refresh a feed's channel metadata and upsert its items.
    ///
    /// Stored items missing from the document are kept. Fails with
    /// `NotFound` when the feed was deleted.
    pub async fn apply(&self, feed_id: i64, parsed: &ParsedFeed) -> Result<ReconcileStats> {
        let now = Utc::now();
        let mut stats = ReconcileStats::default();
        let mut tx = self.pool.begin().await?;

        if !FeedRepository::update_channel_tx(&mut tx, feed_id, &parsed.channel, parsed.modified_at)
            .await?
        {
            return Err(FeedsyncError::NotFound(format!("feed {feed_id}")));
        }

        for item in &parsed.items {
            match ItemRepository::upsert_tx(&mut tx, feed_id, item, now).await? {
                UpsertResult::Inserted => stats.inserted += 1,
                UpsertResult::Updated => stats.updated += 1,
                UpsertResult::Unchanged => stats.unchanged += 1,
            }
        }

        tx.commit().await?;
        debug!(
            feed_id,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            "reconciled feed"
        );
        Ok(stats)
    }

    /// Create a feed together with every item of its first document.
    pub async fn create_feed(&self, feed: &NewFeed, parsed: &ParsedFeed) -> Result<(i64, ReconcileStats)> {
        let mut tx = self.pool.begin().await?;
        let feed_id = FeedRepository::create_tx(&mut tx, feed).await?;
        let inserted = ItemRepository::insert_tx(&mut tx, feed_id, &parsed.items, Utc::now()).await?;
        tx.commit().await?;

        let stats = ReconcileStats {
            inserted: inserted as usize,
            ..ReconcileStats::default()
        };
        debug!(feed_id, inserted = stats.inserted, "created feed");
        Ok((feed_id, stats))
    }
}
