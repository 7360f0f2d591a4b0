use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::channels::{ChannelRegistry, DeliveryError};
use crate::config::RunnerConfig;
use crate::db::QueueStore;
use crate::models::QueueItem;

/// Counts for one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Rows delivered.
    pub processed: usize,
    /// Rows whose attempt failed, whether retried or terminal.
    pub failed: usize,
    /// Rows fetched for this batch.
    pub total: usize,
    /// Rows another runner claimed first.
    pub skipped: usize,
}

#[derive(Debug)]
pub enum RunError {
    /// Another batch is still running in this process.
    Busy,
    Store(sqlx::Error),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Busy => write!(f, "a batch is already running"),
            RunError::Store(err) => write!(f, "failed to fetch queue: {err}"),
        }
    }
}

impl From<sqlx::Error> for RunError {
    fn from(err: sqlx::Error) -> Self {
        RunError::Store(err)
    }
}

/// Batch start time, advanced by how long the batch has been running.
#[derive(Debug, Clone, Copy)]
struct BatchClock {
    now: DateTime<Utc>,
    started: Instant,
}

impl BatchClock {
    fn current(&self) -> DateTime<Utc> {
        add_delay(self.now, self.started.elapsed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Sent,
    Retry,
    Failed,
    Skipped,
}

/// Drains due queue rows through the channel senders, one row at a time.
pub struct QueueRunner {
    store: Arc<dyn QueueStore>,
    channels: Arc<ChannelRegistry>,
    config: RunnerConfig,
    running: Mutex<()>,
}

impl QueueRunner {
    pub fn new(
        store: Arc<dyn QueueStore>,
        channels: Arc<ChannelRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            channels,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Run a batch unless one is already in progress in this process.
    pub async fn try_run_batch(&self) -> Result<BatchReport, RunError> {
        let _guard = self.running.try_lock().map_err(|_| RunError::Busy)?;
        Ok(self.run_batch().await?)
    }

    pub async fn run_batch(&self) -> Result<BatchReport, sqlx::Error> {
        self.run_batch_at(Utc::now()).await
    }

    /// One pass over the rows due at `now`. Only the initial fetch can fail the batch.
    ///
    /// Leases, backoff and `sent_at` use `now` plus the time the batch has been
    /// running, so rows late in a slow batch still get fresh leases.
    pub async fn run_batch_at(&self, now: DateTime<Utc>) -> Result<BatchReport, sqlx::Error> {
        let started = Instant::now();
        let items = self.store.due_items(now, self.config.batch_size).await?;

        let mut report = BatchReport {
            total: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            tracing::debug!("No queue items due");
            return Ok(report);
        }

        tracing::info!("Processing {} queue items", items.len());

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.config.row_delay.is_zero() {
                tokio::time::sleep(self.config.row_delay).await;
            }

            let clock = BatchClock { now, started };
            match self.process(item, clock).await {
                Ok(Outcome::Sent) => report.processed += 1,
                Ok(Outcome::Retry) | Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::error!("Queue item {} failed unexpectedly: {e}", item.id);
                    self.record_unexpected(item, clock.current(), &e.to_string())
                        .await;
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Batch complete: {} sent, {} failed, {} skipped of {}",
            report.processed,
            report.failed,
            report.skipped,
            report.total
        );

        Ok(report)
    }

    async fn process(&self, item: &QueueItem, clock: BatchClock) -> Result<Outcome, sqlx::Error> {
        let claimed_at = clock.current();
        let lease_until = add_delay(claimed_at, self.config.claim_lease);
        let Some(item) = self.store.claim(item.id, claimed_at, lease_until).await? else {
            tracing::debug!("Queue item {} already claimed, skipping", item.id);
            return Ok(Outcome::Skipped);
        };

        let attempts = item.attempts + 1;
        tracing::debug!(
            "Delivering queue item {} via {} (attempt {attempts})",
            item.id,
            item.channel
        );

        let result = match item.message() {
            Ok(payload) => {
                self.channels
                    .send(item.channel, &item.recipient, &payload)
                    .await
            }
            Err(e) => Err(DeliveryError::Rejected(format!("malformed payload: {e}"))),
        };
        let finished_at = clock.current();

        match result {
            Ok(()) => {
                self.store.mark_sent(item.id, attempts, finished_at).await?;
                Ok(Outcome::Sent)
            }
            Err(err) if err.is_permanent() || attempts >= self.config.max_attempts => {
                tracing::warn!(
                    "Queue item {} failed permanently after {attempts} attempts: {err}",
                    item.id
                );
                self.store
                    .mark_failed(item.id, attempts, &err.to_string())
                    .await?;
                Ok(Outcome::Failed)
            }
            Err(err) => {
                let next_attempt_at =
                    add_delay(finished_at, backoff_delay(self.config.backoff_base, attempts));
                tracing::info!(
                    "Queue item {} attempt {attempts} failed, retrying at {next_attempt_at}: {err}",
                    item.id
                );
                self.store
                    .mark_retry(
                        item.id,
                        attempts,
                        next_attempt_at,
                        &format!("delivery failed, will retry: {err}"),
                    )
                    .await?;
                Ok(Outcome::Retry)
            }
        }
    }

    /// Count the attempt and push the row out by one base interval.
    async fn record_unexpected(&self, item: &QueueItem, now: DateTime<Utc>, error: &str) {
        let attempts = item.attempts + 1;
        let result = if attempts >= self.config.max_attempts {
            self.store.mark_failed(item.id, attempts, error).await
        } else {
            self.store
                .mark_retry(
                    item.id,
                    attempts,
                    add_delay(now, self.config.backoff_base),
                    error,
                )
                .await
        };

        if let Err(e) = result {
            tracing::error!("Failed to record error for queue item {}: {e}", item.id);
        }
    }
}

/// `base * 2^attempts`, where `attempts` already counts the failed one.
pub fn backoff_delay(base: Duration, attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 20) as u32;
    base.saturating_mul(1u32 << exponent)
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Run batches on a fixed interval until shutdown is signaled.
pub fn spawn_scheduler(
    runner: Arc<QueueRunner>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Queue scheduler started (every {}s)", interval.as_secs());

        loop {
            if *shutdown.borrow() {
                break;
            }

            match runner.try_run_batch().await {
                Ok(_) => {}
                Err(RunError::Busy) => tracing::debug!("Previous batch still running, skipping tick"),
                Err(e) => tracing::error!("Scheduled batch failed: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        tracing::info!("Queue scheduler stopped");
    })
}
