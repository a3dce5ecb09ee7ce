//! Test helpers for sync tests.
//!
//! Provides a scripted feed source, a recording notifier, document builders
//! and a `TestEnv` wiring them to an in-memory database.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lettre::address::Envelope;
use lettre::AsyncTransport;

use feedsync::config::SyncConfig;
use feedsync::feed::{FailureNotice, Feed, Item, ItemRepository};
use feedsync::{
    Database, FeedService, FeedSource, FeedsyncError, FetchOutcome, Notifier, ParsedFeed,
    ParsedItem, RetryPolicy, Scheduler, SyncOrchestrator, User, UserRepository,
};

/// Fixed fingerprint used by `document`.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// A later fingerprint.
pub fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
}

/// A valid document with `count` items and the given fingerprint.
pub fn document_at(count: usize, modified_at: DateTime<Utc>) -> ParsedFeed {
    let mut feed = ParsedFeed::new("Example", "https://example.com", "Example feed")
        .with_modified_at(modified_at);
    for i in 0..count {
        feed = feed.with_item(
            ParsedItem::new(format!("guid-{i}"))
                .with_title(format!("Item {i}"))
                .with_link(format!("https://example.com/items/{i}"))
                .with_description(format!("Body of item {i}"))
                .with_published_at(modified_at - chrono::Duration::hours(i as i64)),
        );
    }
    feed
}

/// A valid document with `count` items fingerprinted at [`t0`].
pub fn document(count: usize) -> ParsedFeed {
    document_at(count, t0())
}

/// An RSS 2.0 document with `count` items.
pub fn rss_xml(count: usize) -> String {
    let items: String = (0..count)
        .map(|i| {
            format!(
                "<item><title>Item {i}</title><link>https://example.com/items/{i}</link>\
                 <guid>guid-{i}</guid><description>Body of item {i}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Example</title><link>https://example.com/</link><description>Example feed</description>
<lastBuildDate>Wed, 01 May 2024 12:00:00 GMT</lastBuildDate>
{items}
</channel></rss>"#
    )
}

/// Feed source answering from per-URL scripts.
///
/// Queued outcomes are served first, then the URL's fallback. URLs without
/// any script are unreachable.
#[derive(Default)]
pub struct ScriptedSource {
    queued: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    fallback: Mutex<HashMap<String, FetchOutcome>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `outcome` once, before the fallback.
    pub fn push(&self, url: &str, outcome: FetchOutcome) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Serve `outcome` whenever nothing is queued.
    pub fn always(&self, url: &str, outcome: FetchOutcome) {
        self.fallback.lock().unwrap().insert(url.to_string(), outcome);
    }

    /// Serve a parsed document whenever nothing is queued.
    pub fn serve(&self, url: &str, parsed: ParsedFeed) {
        self.always(url, FetchOutcome::Parsed(parsed));
    }

    /// Make every fetch take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of fetches that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, url: &str) -> FetchOutcome {
        if let Some(outcome) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Unreachable(format!("no route to {url}")))
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome(url);
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Notifier that records every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<FailureNotice>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records and then reports a delivery error.
    pub fn failing() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn notices(&self) -> Vec<FailureNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn count_for(&self, feed_id: i64) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.feed_id == feed_id)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &FailureNotice) -> feedsync::Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(FeedsyncError::Notify("mail server down".to_string()));
        }
        Ok(())
    }
}

/// Mail transport that keeps every message instead of sending it.
///
/// Clones share the recorded messages.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(Vec<String>, String)>>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose relay refuses every message.
    pub fn refusing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    /// Recipients and raw text of every accepted message.
    pub fn sent(&self) -> Vec<(Vec<String>, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AsyncTransport for RecordingTransport {
    type Ok = ();
    type Error = std::io::Error;

    async fn send_raw(&self, envelope: &Envelope, email: &[u8]) -> Result<(), std::io::Error> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "relay refused",
            ));
        }
        let to = envelope.to().iter().map(|a| a.to_string()).collect();
        self.sent
            .lock()
            .unwrap()
            .push((to, String::from_utf8_lossy(email).into_owned()));
        Ok(())
    }
}

/// In-memory database with a scripted source and a recording notifier.
pub struct TestEnv {
    pub db: Database,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub service: FeedService,
    pub owner: User,
}

impl TestEnv {
    /// Environment with `max_retries` retries and no retry delay.
    pub async fn new(max_retries: u32) -> Self {
        Self::with_notifier(max_retries, RecordingNotifier::new()).await
    }

    pub async fn with_notifier(max_retries: u32, notifier: RecordingNotifier) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let source = Arc::new(ScriptedSource::new());
        let notifier = Arc::new(notifier);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            db.clone(),
            source.clone(),
            notifier.clone(),
            RetryPolicy {
                max_retries,
                retry_delay: Duration::ZERO,
            },
        ));
        let service = FeedService::new(Arc::clone(&orchestrator), false);
        let owner = UserRepository::new(db.pool())
            .create("alice", Some("alice@example.com"))
            .await
            .unwrap();

        Self {
            db,
            source,
            notifier,
            orchestrator,
            service,
            owner,
        }
    }

    /// A scheduler over this environment.
    pub fn scheduler(&self, max_concurrency: usize) -> Scheduler {
        let config = SyncConfig {
            max_concurrency,
            ..SyncConfig::default()
        };
        Scheduler::new(Arc::clone(&self.orchestrator), &config)
    }

    /// Subscribe the owner to `url`, serving `parsed` for the initial fetch.
    pub async fn subscribe(&self, url: &str, parsed: ParsedFeed) -> Feed {
        self.source.push(url, FetchOutcome::Parsed(parsed));
        self.service.subscribe(self.owner.id, url).await.unwrap()
    }

    pub async fn feed(&self, feed_id: i64) -> Feed {
        self.service.get_feed(feed_id).await.unwrap()
    }

    /// All items of a feed ordered by guid.
    pub async fn items(&self, feed_id: i64) -> Vec<Item> {
        let mut items = ItemRepository::new(self.db.pool())
            .list_by_feed(feed_id, 10_000, 0)
            .await
            .unwrap();
        items.sort_by(|a, b| a.guid.cmp(&b.guid));
        items
    }
}
