//! Feed synchronization.
//!
//! A sync fetches a feed document, validates it, compares its fingerprint
//! with the stored one and reconciles channel metadata and items into the
//! store. Periodic syncs are fanned out by the [`Scheduler`] with retries;
//! user-triggered ones go through the [`FeedService`]. Failure notices are
//! queued in an outbox and mailed by [`OutboxDelivery`].

pub mod detector;
pub mod fetcher;
pub mod mailer;
pub mod notifier;
pub mod orchestrator;
pub mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod types;
pub mod validator;

pub use detector::has_changed;
pub use fetcher::{parse_document, validate_url, FeedSource, FetchOutcome, HttpFeedSource};
pub use mailer::{sender, DeliveryReport, Mailer, OutboxDelivery};
pub use notifier::{
    FailureNotice, LogNotifier, Notification, NotificationRepository, Notifier, StoredNotifier,
};
pub use orchestrator::{
    AttemptDecision, InFlight, RetryPolicy, SyncClaim, SyncOrchestrator, SyncOutcome, SyncReport,
};
pub use reconciler::{ReconcileStats, Reconciler};
pub use repository::{FeedRepository, ItemRepository, UpsertResult};
pub use scheduler::{BatchReport, EnqueueSummary, JobResult, Scheduler};
pub use service::FeedService;
pub use types::{Channel, Feed, Item, NewFeed, ParsedFeed, ParsedItem};
pub use validator::{validate, validate_fetch, ValidationError};
