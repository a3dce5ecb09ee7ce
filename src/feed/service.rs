//! Feed service.
//!
//! User-triggered operations: subscribing to a feed, forcing a resync,
//! unsubscribing and reading. Subscribing and resyncing run the pipeline
//! synchronously and return rejections to the caller instead of retrying.

use std::sync::Arc;

use tracing::info;

use super::fetcher::{validate_url, FetchOutcome};
use super::orchestrator::{SyncOrchestrator, SyncReport};
use super::reconciler::Reconciler;
use super::repository::{FeedRepository, ItemRepository};
use super::types::{Feed, Item, NewFeed};
use super::validator::validate_fetch;
use crate::db::UserRepository;
use crate::{FeedsyncError, Result};

/// Service for feed operations.
pub struct FeedService {
    orchestrator: Arc<SyncOrchestrator>,
    allow_private_hosts: bool,
}

impl FeedService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, allow_private_hosts: bool) -> Self {
        Self {
            orchestrator,
            allow_private_hosts,
        }
    }

    fn feeds(&self) -> FeedRepository<'_> {
        FeedRepository::new(self.orchestrator.database().pool())
    }

    fn items(&self) -> ItemRepository<'_> {
        ItemRepository::new(self.orchestrator.database().pool())
    }

    /// Follow a feed.
    ///
    /// The document is fetched and validated first; the feed and all its
    /// items are stored together only when it is accepted.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` if the URL cannot be followed
    /// - `NotFound` if the owner does not exist
    /// - `AlreadyFollowing` if the owner already follows this URL
    /// - `Fetch` if the source cannot be reached
    /// - `Validation` if the document is rejected
    pub async fn subscribe(&self, owner_id: i64, url: &str) -> Result<Feed> {
        let url = url.trim();
        validate_url(url, self.allow_private_hosts)?;

        let pool = self.orchestrator.database().pool();
        if UserRepository::new(pool).get_by_id(owner_id).await?.is_none() {
            return Err(FeedsyncError::NotFound(format!("user {owner_id}")));
        }

        let feeds = self.feeds();
        if feeds.get_by_owner_url(owner_id, url).await?.is_some() {
            return Err(FeedsyncError::AlreadyFollowing(url.to_string()));
        }

        let outcome = self.orchestrator.source().fetch(url).await;
        if let FetchOutcome::Unreachable(reason) = outcome {
            return Err(FeedsyncError::Fetch(reason));
        }
        let parsed = validate_fetch(&outcome)?;

        let new_feed = NewFeed::from_parsed(owner_id, url, parsed);
        let (feed_id, stats) = Reconciler::new(pool).create_feed(&new_feed, parsed).await?;
        info!(feed_id, owner_id, url, items = stats.inserted, "Subscribed to feed");

        feeds
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| FeedsyncError::NotFound(format!("feed {feed_id}")))
    }

    /// Sync a feed now, even if periodic sync disabled it.
    ///
    /// A successful resync makes the feed eligible for periodic sync again.
    pub async fn resync(&self, feed_id: i64) -> Result<SyncReport> {
        self.orchestrator.sync_now(feed_id).await
    }

    /// Stop following a feed. Its items are deleted with it.
    pub async fn unsubscribe(&self, owner_id: i64, feed_id: i64) -> Result<()> {
        if !self.feeds().delete_for_owner(feed_id, owner_id).await? {
            return Err(FeedsyncError::NotFound(format!("feed {feed_id}")));
        }
        info!(feed_id, owner_id, "Unsubscribed from feed");
        Ok(())
    }

    /// Make a disabled feed eligible for periodic sync again without syncing.
    pub async fn enable(&self, feed_id: i64) -> Result<()> {
        if !self.feeds().set_updated(feed_id, true).await? {
            return Err(FeedsyncError::NotFound(format!("feed {feed_id}")));
        }
        info!(feed_id, "Feed re-enabled");
        Ok(())
    }

    /// Get a feed by ID.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Feed> {
        self.feeds()
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| FeedsyncError::NotFound(format!("feed {feed_id}")))
    }

    /// List an owner's feeds.
    pub async fn list_feeds(&self, owner_id: i64) -> Result<Vec<Feed>> {
        self.feeds().list_by_owner(owner_id).await
    }

    /// List a feed's items, newest first.
    pub async fn list_items(&self, feed_id: i64, limit: usize, offset: usize) -> Result<Vec<Item>> {
        self.items().list_by_feed(feed_id, limit, offset).await
    }

    /// Set the read flag of an item in one of the owner's feeds.
    pub async fn mark_read(&self, owner_id: i64, item_id: i64, read: bool) -> Result<()> {
        if !self.items().mark_read(item_id, owner_id, read).await? {
            return Err(FeedsyncError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }
}
