//! Feed and item types for feedsync.

use chrono::{DateTime, Utc};

/// A followed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Owning user ID.
    pub owner_id: i64,
    /// Source URL of the feed document.
    pub url: String,
    /// Channel title.
    pub title: String,
    /// Channel link (the website the feed belongs to).
    pub link: String,
    /// Channel description.
    pub description: String,
    /// Change fingerprint from the last reconciled document.
    ///
    /// `None` means unknown; the next fetch is always treated as changed.
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether the feed takes part in periodic syncing.
    pub updated: bool,
    /// When the last successful sync finished.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Reason of the last failed sync, cleared on success.
    pub last_error: Option<String>,
    /// When the feed was created.
    pub created_at: DateTime<Utc>,
}

/// New feed for creation.
#[derive(Debug, Clone)]
pub struct NewFeed {
    /// Owning user ID.
    pub owner_id: i64,
    /// Source URL.
    pub url: String,
    /// Channel title.
    pub title: String,
    /// Channel link.
    pub link: String,
    /// Channel description.
    pub description: String,
    /// Initial change fingerprint.
    pub modified_at: Option<DateTime<Utc>>,
}

impl NewFeed {
    /// Create a new feed with empty channel metadata.
    pub fn new(owner_id: i64, url: impl Into<String>) -> Self {
        Self {
            owner_id,
            url: url.into(),
            title: String::new(),
            link: String::new(),
            description: String::new(),
            modified_at: None,
        }
    }

    /// Create a new feed carrying the channel metadata of a parsed document.
    pub fn from_parsed(owner_id: i64, url: impl Into<String>, parsed: &ParsedFeed) -> Self {
        Self {
            owner_id,
            url: url.into(),
            title: parsed.channel.title.clone().unwrap_or_default(),
            link: parsed.channel.link.clone().unwrap_or_default(),
            description: parsed.channel.description.clone().unwrap_or_default(),
            modified_at: parsed.modified_at,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A stored feed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Item ID.
    pub id: i64,
    /// Feed ID this item belongs to.
    pub feed_id: i64,
    /// Identity of the item within its feed.
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Last time a sync wrote this row.
    pub last_updated_at: DateTime<Utc>,
    /// Read flag, owned by readers and never touched by sync.
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Whether the stored content equals a parsed item's content.
    pub fn same_content(&self, parsed: &ParsedItem) -> bool {
        self.title == parsed.title
            && self.link == parsed.link
            && self.description == parsed.description
            && self.published_at == parsed.published_at
    }
}

/// Channel-level metadata of a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
}

/// A parsed feed document. Lives for a single sync attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// Channel metadata.
    pub channel: Channel,
    /// Channel modification timestamp, used as the change fingerprint.
    pub modified_at: Option<DateTime<Utc>>,
    /// Entries in document order.
    pub items: Vec<ParsedItem>,
}

impl ParsedFeed {
    /// Create a parsed feed with complete channel metadata and no items.
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            channel: Channel {
                title: Some(title.into()),
                link: Some(link.into()),
                description: Some(description.into()),
            },
            modified_at: None,
            items: Vec::new(),
        }
    }

    /// Set the channel modification timestamp.
    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Append an item.
    pub fn with_item(mut self, item: ParsedItem) -> Self {
        self.items.push(item);
        self
    }
}

/// A parsed entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    /// Entry identifier; empty when the document carried none.
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ParsedItem {
    /// Create an item with only a guid.
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            ..Self::default()
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the published date.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}
