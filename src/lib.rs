//! feedsync - feed synchronization engine
//!
//! Periodically fetches syndication feeds, detects whether their content
//! changed and reconciles channel metadata and items into a local store,
//! retrying transient failures and disabling feeds that keep failing.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;

pub use config::Config;
pub use db::{Database, User, UserRepository};
pub use error::{FeedsyncError, Result};
pub use feed::{
    BatchReport, FeedService, FeedSource, FetchOutcome, HttpFeedSource, Mailer, Notifier,
    OutboxDelivery, ParsedFeed, ParsedItem, RetryPolicy, Scheduler, StoredNotifier,
    SyncOrchestrator, SyncReport, ValidationError,
};
