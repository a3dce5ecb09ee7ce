//! Per-feed sync pipeline.
//!
//! One attempt runs fetch, validate, detect and reconcile in that order.
//! The orchestrator then decides whether the attempt is done, should be
//! retried after a delay, or exhausted the retry budget. Exhaustion
//! disables the feed and notifies its owner once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::detector::has_changed;
use super::fetcher::{FeedSource, FetchOutcome};
use super::notifier::{FailureNotice, Notifier};
use super::reconciler::{ReconcileStats, Reconciler};
use super::repository::FeedRepository;
use super::types::Feed;
use super::validator::{validate, ValidationError};
use crate::config::SyncConfig;
use crate::db::{Database, UserRepository};
use crate::{FeedsyncError, Result};

/// Retry budget of a periodic sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed delay before every retry.
    pub retry_delay: Duration,
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Summary of a successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub feed_id: i64,
    /// False when the fingerprint matched and reconciliation was skipped.
    pub changed: bool,
    pub stats: ReconcileStats,
}

/// Result of running the pipeline once.
#[derive(Debug)]
pub enum SyncOutcome {
    Success(SyncReport),
    ValidationFailed(ValidationError),
    /// Fetching or storing failed.
    Error(FeedsyncError),
}

impl SyncOutcome {
    fn reason(&self) -> String {
        match self {
            SyncOutcome::Success(_) => String::new(),
            SyncOutcome::ValidationFailed(e) => format!("validation failed: {e}"),
            SyncOutcome::Error(e) => e.to_string(),
        }
    }
}

/// What the caller should do after a periodic attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDecision {
    /// The feed synced.
    Done(SyncReport),
    /// Run the pipeline again from the top after `after`.
    Retry { after: Duration },
    /// Retries are exhausted; the feed was disabled and its owner notified.
    Failed,
    /// The feed no longer exists.
    Gone,
}

/// Registry of feeds with a sync running or waiting for a retry.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    feeds: Arc<Mutex<HashSet<i64>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a feed. `None` when it is already in flight.
    pub fn try_claim(&self, feed_id: i64) -> Option<SyncClaim> {
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        if !feeds.insert(feed_id) {
            return None;
        }
        Some(SyncClaim {
            feed_id,
            feeds: Arc::clone(&self.feeds),
        })
    }

    pub fn contains(&self, feed_id: i64) -> bool {
        self.feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&feed_id)
    }

    pub fn len(&self) -> usize {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to sync one feed. Released on drop.
#[derive(Debug)]
pub struct SyncClaim {
    feed_id: i64,
    feeds: Arc<Mutex<HashSet<i64>>>,
}

impl SyncClaim {
    pub fn feed_id(&self) -> i64 {
        self.feed_id
    }
}

impl Drop for SyncClaim {
    fn drop(&mut self) {
        self.feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.feed_id);
    }
}

/// Drives the sync pipeline of single feeds.
pub struct SyncOrchestrator {
    db: Database,
    source: Arc<dyn FeedSource>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    in_flight: InFlight,
}

impl SyncOrchestrator {
    pub fn new(
        db: Database,
        source: Arc<dyn FeedSource>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            source,
            notifier,
            policy,
            in_flight: InFlight::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    /// Fetch, validate, detect and reconcile once.
    pub async fn run_pipeline(&self, feed: &Feed) -> SyncOutcome {
        let outcome = self.source.fetch(&feed.url).await;
        debug!(feed_id = feed.id, "fetched: {}", outcome.describe());
        let parsed = match outcome {
            FetchOutcome::Parsed(parsed) => parsed,
            FetchOutcome::Unreachable(reason) => {
                return SyncOutcome::Error(FeedsyncError::Fetch(reason))
            }
            FetchOutcome::Malformed(reason) => {
                return SyncOutcome::Error(FeedsyncError::Malformed(reason))
            }
        };

        if let Err(e) = validate(&parsed) {
            return SyncOutcome::ValidationFailed(e);
        }

        if !has_changed(feed.modified_at, &parsed) {
            debug!(feed_id = feed.id, "fingerprint unchanged, skipping reconciliation");
            return SyncOutcome::Success(SyncReport {
                feed_id: feed.id,
                changed: false,
                stats: ReconcileStats::default(),
            });
        }

        match Reconciler::new(self.db.pool()).apply(feed.id, &parsed).await {
            Ok(stats) => SyncOutcome::Success(SyncReport {
                feed_id: feed.id,
                changed: true,
                stats,
            }),
            Err(e) => SyncOutcome::Error(e),
        }
    }

    /// Run one periodic attempt and decide what happens next.
    ///
    /// `attempt` counts from 0 for the initial run. Validation failures use
    /// the same retry budget as transient failures. Any other error is not
    /// retried and disables the feed at once.
    pub async fn attempt(&self, feed_id: i64, attempt: u32) -> AttemptDecision {
        let feeds = FeedRepository::new(self.db.pool());
        let outcome = match feeds.get_by_id(feed_id).await {
            Ok(Some(feed)) => self.run_pipeline(&feed).await,
            Ok(None) => {
                debug!(feed_id, "feed disappeared before sync");
                return AttemptDecision::Gone;
            }
            Err(e) => SyncOutcome::Error(e),
        };

        let outcome = match outcome {
            SyncOutcome::Success(report) => match feeds.record_success(feed_id, Utc::now()).await {
                Ok(_) => {
                    info!(
                        feed_id,
                        attempt,
                        changed = report.changed,
                        inserted = report.stats.inserted,
                        updated = report.stats.updated,
                        "feed synced"
                    );
                    return AttemptDecision::Done(report);
                }
                Err(e) => SyncOutcome::Error(e),
            },
            other => other,
        };

        let retryable = match &outcome {
            SyncOutcome::Error(FeedsyncError::NotFound(_)) => {
                debug!(feed_id, "feed deleted during sync");
                return AttemptDecision::Gone;
            }
            SyncOutcome::Error(e) => e.is_transient(),
            _ => true,
        };

        let reason = outcome.reason();
        if retryable && attempt < self.policy.max_retries {
            warn!(feed_id, attempt, "sync attempt failed, retrying: {}", reason);
            if let Err(e) = feeds.record_error(feed_id, &reason).await {
                warn!(feed_id, "failed to record sync error: {}", e);
            }
            return AttemptDecision::Retry {
                after: self.policy.retry_delay,
            };
        }

        error!(feed_id, attempt, "sync retries exhausted, disabling feed: {}", reason);
        self.disable_and_notify(feed_id, &reason).await;
        AttemptDecision::Failed
    }

    async fn disable_and_notify(&self, feed_id: i64, reason: &str) {
        let feeds = FeedRepository::new(self.db.pool());
        if let Err(e) = feeds.record_failure(feed_id, reason).await {
            error!(feed_id, "failed to disable feed: {}", e);
        }

        match self.failure_notice(feed_id, reason).await {
            Ok(Some(notice)) => {
                if let Err(e) = self.notifier.notify(&notice).await {
                    warn!(feed_id, "failed to notify owner: {}", e);
                }
            }
            Ok(None) => warn!(feed_id, "no owner to notify"),
            Err(e) => warn!(feed_id, "failed to build failure notice: {}", e),
        }
    }

    async fn failure_notice(&self, feed_id: i64, reason: &str) -> Result<Option<FailureNotice>> {
        let Some(feed) = FeedRepository::new(self.db.pool()).get_by_id(feed_id).await? else {
            return Ok(None);
        };
        let Some(owner) = UserRepository::new(self.db.pool())
            .get_by_id(feed.owner_id)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(FailureNotice {
            owner_id: owner.id,
            username: owner.username,
            email: owner.email,
            feed_id: feed.id,
            feed_url: feed.url,
            reason: reason.to_string(),
        }))
    }

    /// Sync one feed now, regardless of its eligibility flag.
    ///
    /// No retry is scheduled. A rejected document surfaces as
    /// [`FeedsyncError::Validation`], an unreachable source as
    /// [`FeedsyncError::Fetch`].
    pub async fn sync_now(&self, feed_id: i64) -> Result<SyncReport> {
        let _claim = self
            .in_flight
            .try_claim(feed_id)
            .ok_or(FeedsyncError::SyncInProgress(feed_id))?;

        let feeds = FeedRepository::new(self.db.pool());
        let feed = feeds
            .get_by_id(feed_id)
            .await?
            .ok_or_else(|| FeedsyncError::NotFound(format!("feed {feed_id}")))?;

        let error = match self.run_pipeline(&feed).await {
            SyncOutcome::Success(report) => {
                feeds.record_success(feed_id, Utc::now()).await?;
                info!(feed_id, changed = report.changed, "feed resynced");
                return Ok(report);
            }
            SyncOutcome::ValidationFailed(e) => FeedsyncError::Validation(e),
            SyncOutcome::Error(e) => e,
        };

        warn!(feed_id, "on-demand sync failed: {}", error);
        if let Err(e) = feeds.record_error(feed_id, &error.to_string()).await {
            warn!(feed_id, "failed to record sync error: {}", e);
        }
        Err(on_demand_error(error))
    }
}

/// Error returned to an interactive caller for a failed fetch or write.
///
/// A document that could not be used as a feed is a content rejection for
/// the caller, not a transient condition.
pub(crate) fn on_demand_error(e: FeedsyncError) -> FeedsyncError {
    match e {
        FeedsyncError::Malformed(_) => FeedsyncError::Validation(ValidationError::InvalidFeed),
        other => other,
    }
}
