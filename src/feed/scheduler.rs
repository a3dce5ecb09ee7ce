//! Periodic fan-out of feed syncs.
//!
//! Every tick enqueues the eligible feeds on a work queue. A dispatcher runs
//! each job under a semaphore permit; a job that asks for a retry releases
//! its permit, sleeps, and re-enters the queue with the next attempt number.
//! The job's [`SyncClaim`] travels with it, so a feed never has two syncs in
//! flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::orchestrator::{AttemptDecision, SyncClaim, SyncOrchestrator};
use super::repository::FeedRepository;
use crate::config::SyncConfig;
use crate::Result;

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    /// Synced; `changed` is false when reconciliation was skipped.
    Succeeded { changed: bool },
    /// Retries exhausted, or the job crashed.
    Failed,
    /// The feed was deleted before the job ran.
    Gone,
}

/// One queued sync of a feed.
struct SyncJob {
    feed_id: i64,
    attempt: u32,
    claim: SyncClaim,
    reporter: Option<mpsc::UnboundedSender<JobResult>>,
}

/// Counts of one enqueue pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub enqueued: usize,
    /// Eligible feeds that already had a sync in flight.
    pub skipped: usize,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Feeds whose documents were reconciled.
    pub succeeded: usize,
    /// Feeds whose fingerprint had not changed.
    pub unchanged: usize,
    /// Feeds disabled after exhausting their retries.
    pub failed: usize,
    /// Feeds already in flight or deleted.
    pub skipped: usize,
}

impl BatchReport {
    fn record(&mut self, result: JobResult) {
        match result {
            JobResult::Succeeded { changed: true } => self.succeeded += 1,
            JobResult::Succeeded { changed: false } => self.unchanged += 1,
            JobResult::Failed => self.failed += 1,
            JobResult::Gone => self.skipped += 1,
        }
    }

    /// Number of feeds the batch looked at.
    pub fn total(&self) -> usize {
        self.succeeded + self.unchanged + self.failed + self.skipped
    }
}

/// Periodic feed scheduler.
pub struct Scheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    queue: mpsc::UnboundedSender<SyncJob>,
    dispatcher: JoinHandle<()>,
}

impl Scheduler {
    /// Create a scheduler and start its dispatcher.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(orchestrator: Arc<SyncOrchestrator>, config: &SyncConfig) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&orchestrator),
            semaphore,
            queue.clone(),
            jobs,
        ));

        Self {
            orchestrator,
            interval: config.interval(),
            queue,
            dispatcher,
        }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Run the scheduler loop.
    ///
    /// Ticks never wait for earlier batches to finish. This method runs
    /// until the surrounding task is cancelled.
    pub async fn run(&self) {
        info!(
            "Feed scheduler started (interval: {} seconds)",
            self.interval.as_secs()
        );

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            match self.enqueue_eligible().await {
                Ok(summary) if summary.enqueued > 0 || summary.skipped > 0 => info!(
                    enqueued = summary.enqueued,
                    skipped = summary.skipped,
                    "Scheduled feed sync batch"
                ),
                Ok(_) => debug!("No feeds eligible for sync"),
                Err(e) => error!("Failed to list eligible feeds: {}", e),
            }
        }
    }

    /// Enqueue every eligible feed that is not already in flight, without
    /// waiting for the jobs.
    pub async fn enqueue_eligible(&self) -> Result<EnqueueSummary> {
        self.enqueue(None).await
    }

    async fn enqueue(
        &self,
        reporter: Option<mpsc::UnboundedSender<JobResult>>,
    ) -> Result<EnqueueSummary> {
        let feeds = FeedRepository::new(self.orchestrator.database().pool())
            .list_eligible()
            .await?;

        let mut summary = EnqueueSummary::default();
        for feed in feeds {
            let Some(claim) = self.orchestrator.in_flight().try_claim(feed.id) else {
                debug!(feed_id = feed.id, "feed already in flight, skipping");
                summary.skipped += 1;
                continue;
            };

            let job = SyncJob {
                feed_id: feed.id,
                attempt: 0,
                claim,
                reporter: reporter.clone(),
            };
            if self.queue.send(job).is_err() {
                warn!(feed_id = feed.id, "sync queue closed");
                break;
            }
            summary.enqueued += 1;
        }

        Ok(summary)
    }

    /// Sync every eligible feed and wait until each one reaches a terminal
    /// state, retries included.
    pub async fn run_batch(&self) -> Result<BatchReport> {
        let (reporter, mut results) = mpsc::unbounded_channel();
        let summary = self.enqueue(Some(reporter)).await?;

        let mut report = BatchReport {
            skipped: summary.skipped,
            ..BatchReport::default()
        };
        while let Some(result) = results.recv().await {
            report.record(result);
        }

        info!(
            succeeded = report.succeeded,
            unchanged = report.unchanged,
            failed = report.failed,
            skipped = report.skipped,
            "Feed sync batch finished"
        );
        Ok(report)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(
    orchestrator: Arc<SyncOrchestrator>,
    semaphore: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<SyncJob>,
    mut jobs: mpsc::UnboundedReceiver<SyncJob>,
) {
    while let Some(job) = jobs.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let orchestrator = Arc::clone(&orchestrator);
        let queue = queue.clone();

        tokio::spawn(async move {
            let SyncJob {
                feed_id,
                attempt,
                claim,
                reporter,
            } = job;

            // A panicking attempt must not take the claim or reporter with it.
            let decision =
                tokio::spawn(async move { orchestrator.attempt(feed_id, attempt).await }).await;
            drop(permit);

            let result = match decision {
                Ok(AttemptDecision::Retry { after }) => {
                    tokio::time::sleep(after).await;
                    let retry = SyncJob {
                        feed_id,
                        attempt: attempt + 1,
                        claim,
                        reporter,
                    };
                    if queue.send(retry).is_err() {
                        warn!(feed_id, "sync queue closed, dropping retry");
                    }
                    return;
                }
                Ok(AttemptDecision::Done(report)) => JobResult::Succeeded {
                    changed: report.changed,
                },
                Ok(AttemptDecision::Failed) => JobResult::Failed,
                Ok(AttemptDecision::Gone) => JobResult::Gone,
                Err(e) => {
                    error!(feed_id, attempt, "sync job crashed: {}", e);
                    JobResult::Failed
                }
            };

            drop(claim);
            if let Some(reporter) = reporter {
                let _ = reporter.send(result);
            }
        });
    }
}
