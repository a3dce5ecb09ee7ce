//! Feed and item repositories.
//!
//! Writes that belong to one sync cycle take a transaction (`*_tx`
//! functions); everything else runs directly on the pool.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::types::{Channel, Feed, Item, NewFeed, ParsedItem};
use crate::db::{parse_datetime, DbPool};
use crate::{FeedsyncError, Result};

/// Rows per multi-row INSERT, keeping well under SQLite's bind limit.
const INSERT_CHUNK: usize = 100;

const FEED_COLUMNS: &str = "id, owner_id, url, title, link, description, modified_at, updated, \
                            last_synced_at, last_error, created_at";

const ITEM_COLUMNS: &str =
    "id, feed_id, guid, title, link, description, published_at, last_updated_at, read, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    owner_id: i64,
    url: String,
    title: String,
    link: String,
    description: String,
    modified_at: Option<String>,
    updated: bool,
    last_synced_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            owner_id: row.owner_id,
            url: row.url,
            title: row.title,
            link: row.link,
            description: row.description,
            modified_at: row.modified_at.and_then(|s| parse_datetime(&s)),
            updated: row.updated,
            last_synced_at: row.last_synced_at.and_then(|s| parse_datetime(&s)),
            last_error: row.last_error,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ItemRow {
    id: i64,
    feed_id: i64,
    guid: String,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
    last_updated_at: String,
    read: bool,
    created_at: String,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            feed_id: row.feed_id,
            guid: row.guid,
            title: row.title,
            link: row.link,
            description: row.description,
            published_at: row.published_at.and_then(|s| parse_datetime(&s)),
            last_updated_at: parse_datetime(&row.last_updated_at).unwrap_or_else(Utc::now),
            read: row.read,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Repository for feeds.
pub struct FeedRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FeedRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a feed.
    pub async fn create(&self, feed: &NewFeed) -> Result<Feed> {
        let mut tx = self.pool.begin().await?;
        let id = Self::create_tx(&mut tx, feed).await?;
        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedsyncError::NotFound(format!("feed {id}")))
    }

    /// Create a feed inside a transaction, returning its ID.
    pub async fn create_tx(tx: &mut Transaction<'_, Sqlite>, feed: &NewFeed) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (owner_id, url, title, link, description, modified_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(feed.owner_id)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.link)
        .bind(&feed.description)
        .bind(feed.modified_at.map(timestamp))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                FeedsyncError::AlreadyFollowing(feed.url.clone())
            }
            _ => FeedsyncError::from(e),
        })?;
        Ok(id)
    }

    /// Get a feed by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Feed::from))
    }

    /// Get the feed an owner follows at `url`.
    pub async fn get_by_owner_url(&self, owner_id: i64, url: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE owner_id = ? AND url = ?"
        ))
        .bind(owner_id)
        .bind(url)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Feed::from))
    }

    /// List feeds eligible for periodic sync, in creation order.
    pub async fn list_eligible(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE updated = 1 ORDER BY id ASC"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// List the feeds of an owner.
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE owner_id = ? ORDER BY id ASC"
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Overwrite channel metadata and, when given, the change fingerprint.
    ///
    /// Missing channel fields keep their stored value.
    pub async fn update_channel_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        channel: &Channel,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET title = COALESCE(?, title),
                link = COALESCE(?, link),
                description = COALESCE(?, description),
                modified_at = COALESCE(?, modified_at)
            WHERE id = ?
            "#,
        )
        .bind(&channel.title)
        .bind(&channel.link)
        .bind(&channel.description)
        .bind(modified_at.map(timestamp))
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the periodic-sync eligibility flag.
    pub async fn set_updated(&self, id: i64, updated: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET updated = ? WHERE id = ?")
            .bind(updated)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a sync as successful: eligible again, error cleared.
    pub async fn record_success(&self, id: i64, synced_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE feeds SET updated = 1, last_error = NULL, last_synced_at = ? WHERE id = ?",
        )
        .bind(timestamp(synced_at))
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remember why the latest attempt failed without changing eligibility.
    pub async fn record_error(&self, id: i64, error: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Disable periodic sync after exhausted retries.
    pub async fn record_failure(&self, id: i64, error: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE feeds SET updated = 0, last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an owner's feed. Its items go with it.
    pub async fn delete_for_owner(&self, id: i64, owner_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// One item per guid, in order of first appearance. A repeated guid takes
/// the content of its last occurrence.
fn last_by_guid(items: &[ParsedItem]) -> Vec<&ParsedItem> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<&ParsedItem> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(item.guid.as_str()) {
            Some(&pos) => unique[pos] = item,
            None => {
                positions.insert(item.guid.as_str(), unique.len());
                unique.push(item);
            }
        }
    }
    unique
}

/// Result of upserting one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// No row existed for the guid.
    Inserted,
    /// The row existed with different content and was overwritten.
    Updated,
    /// The row existed with identical content and was not written.
    Unchanged,
}

/// Repository for feed items.
pub struct ItemRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ItemRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh an item keyed by (feed_id, guid).
    ///
    /// The `read` flag of an existing row is never touched.
    pub async fn upsert_tx(
        tx: &mut Transaction<'_, Sqlite>,
        feed_id: i64,
        item: &ParsedItem,
        now: DateTime<Utc>,
    ) -> Result<UpsertResult> {
        let existing = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ? AND guid = ?"
        ))
        .bind(feed_id)
        .bind(&item.guid)
        .fetch_optional(&mut **tx)
        .await?
        .map(Item::from);

        let Some(existing) = existing else {
            Self::insert_tx(tx, feed_id, std::slice::from_ref(item), now).await?;
            return Ok(UpsertResult::Inserted);
        };

        if existing.same_content(item) {
            return Ok(UpsertResult::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE items
            SET title = ?, link = ?, description = ?, published_at = ?, last_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.description)
        .bind(item.published_at.map(timestamp))
        .bind(timestamp(now))
        .bind(existing.id)
        .execute(&mut **tx)
        .await?;

        Ok(UpsertResult::Updated)
    }

    /// Insert items as new unread rows, returning the number inserted.
    pub async fn insert_tx(
        tx: &mut Transaction<'_, Sqlite>,
        feed_id: i64,
        items: &[ParsedItem],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let now = timestamp(now);
        let items = last_by_guid(items);
        let mut inserted = 0;

        for chunk in items.chunks(INSERT_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO items (feed_id, guid, title, link, description, published_at, last_updated_at) ",
            );
            query.push_values(chunk.iter().copied(), |mut row, item| {
                row.push_bind(feed_id)
                    .push_bind(&item.guid)
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(&item.description)
                    .push_bind(item.published_at.map(timestamp))
                    .push_bind(&now);
            });
            inserted += query.build().execute(&mut **tx).await?.rows_affected();
        }

        Ok(inserted)
    }

    /// Get an item by feed ID and guid.
    pub async fn get_by_guid(&self, feed_id: i64, guid: &str) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE feed_id = ? AND guid = ?"
        ))
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(Item::from))
    }

    /// List items for a feed (newest first).
    pub async fn list_by_feed(&self, feed_id: i64, limit: usize, offset: usize) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE feed_id = ?
            ORDER BY COALESCE(published_at, created_at) DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(feed_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Count items for a feed.
    pub async fn count_by_feed(&self, feed_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Set the read flag of an item in one of the owner's feeds.
    pub async fn mark_read(&self, item_id: i64, owner_id: i64, read: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE items SET read = ?
            WHERE id = ? AND feed_id IN (SELECT id FROM feeds WHERE owner_id = ?)
            "#,
        )
        .bind(read)
        .bind(item_id)
        .bind(owner_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
