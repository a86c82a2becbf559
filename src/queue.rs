//! Durable priority/delayed job queue on top of the shared store.
//!
//! Per queue the store holds a priority sorted set (score = -priority), a
//! delayed sorted set (score = ready time in epoch milliseconds) and a
//! dead-letter list. Messages and status records live under their own keys.

mod consumer;
mod message;
mod registry;
mod supervisor;

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use consumer::Consumer;
pub use message::{DeadLetterEntry, JobMessage, JobRecord, JobStatus};
pub use registry::{JobRegistry, JobResult};
pub use supervisor::{spawn_consumer, spawn_delayed_mover};

use crate::config::QueueConfig;
use crate::store::{SharedStore, StoreError};

/// Delayed jobs promoted per mover pass
/// Name of the breaker guarding the queue's store
pub const QUEUE_BREAKER: &str = "queue";

const MOVE_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    FailPermanently(String),
    #[error("{0}")]
    TryAgainLater(String),
}

pub trait Job: Send + Sync {
    type Context: Clone + Send + Sync + 'static;
    type Arguments: DeserializeOwned + Send + Sync;

    fn execute(
        context: &Self::Context,
        message: &JobMessage,
        arguments: Self::Arguments,
    ) -> impl Future<Output = Result<(), JobError>> + Send;

    fn name() -> &'static str;

    /// Runs once after the job is moved to the dead letters.
    fn dead_lettered(
        _context: &Self::Context,
        _message: &JobMessage,
        _reason: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),
    #[error("Malformed queue entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Consumer '{0}' stopped")]
    Stopped(String),
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: i32,
    pub delay: Option<Duration>,
    /// Overrides the queue's configured retry budget
    pub max_retries: Option<u32>,
    pub callback: Option<String>,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retried { attempt: u32, delay: Duration },
    DeadLettered,
    /// The job was cancelled while running; nothing was written
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub priority: u64,
    pub delayed: u64,
    pub dead_letters: u64,
}

/// Current wall clock time in epoch milliseconds, the unit of delayed scores.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct MessageQueue {
    store: SharedStore,
    prefix: String,
    max_retries: u32,
    retry_base_delay: Duration,
    status_retention: Duration,
}

impl MessageQueue {
    #[must_use]
    pub fn new(store: SharedStore, config: &QueueConfig) -> Self {
        Self {
            store,
            prefix: config.key_prefix.clone(),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            status_retention: Duration::from_secs(config.status_retention_seconds),
        }
    }

    fn priority_key(&self, queue: &str) -> String {
        format!("{}:{queue}:priority", self.prefix)
    }

    fn delayed_key(&self, queue: &str) -> String {
        format!("{}:{queue}:delayed", self.prefix)
    }

    fn dead_letter_key(&self, queue: &str) -> String {
        format!("{}:{queue}:dead", self.prefix)
    }

    fn message_key(&self, id: Uuid) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn status_key(&self, id: Uuid) -> String {
        format!("{}:status:{id}", self.prefix)
    }

    /// Delay before retry number `attempt`: base × 2^attempt.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.min(20)))
    }

    pub async fn publish(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> Result<Uuid, QueueError> {
        let message = JobMessage {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload,
            priority: options.priority,
            retry_count: 0,
            max_retries: options.max_retries.unwrap_or(self.max_retries),
            callback: options.callback,
            created_at: Utc::now(),
        };

        self.save_message(&message).await?;
        self.write_record(&JobRecord::queued(&message)).await?;
        self.enqueue(&message, options.delay).await?;

        debug!(
            "📬 Published {}({}) to '{}' with priority {}",
            message.job_type, message.id, queue, message.priority
        );
        Ok(message.id)
    }

    /// Publish a typed job under its registered name.
    pub async fn add<J: Job>(
        &self,
        queue: &str,
        arguments: &impl Serialize,
        options: PublishOptions,
    ) -> Result<Uuid, QueueError> {
        self.publish(queue, J::name(), serde_json::to_value(arguments)?, options)
            .await
    }

    async fn save_message(&self, message: &JobMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        self.store
            .set(&self.message_key(message.id), &payload, None)
            .await?;
        Ok(())
    }

    async fn load_message(&self, id: Uuid) -> Result<Option<JobMessage>, QueueError> {
        match self.store.get(&self.message_key(id)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn enqueue(&self, message: &JobMessage, delay: Option<Duration>) -> Result<(), QueueError> {
        let member = message.id.to_string();
        match delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                #[allow(clippy::cast_precision_loss)]
                let ready_at = now_ms().saturating_add(millis(delay)) as f64;
                self.store
                    .zadd(&self.delayed_key(&message.queue), &member, ready_at)
                    .await?;
            }
            None => {
                self.store
                    .zadd(
                        &self.priority_key(&message.queue),
                        &member,
                        -f64::from(message.priority),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Pop the highest priority deliverable job. Entries whose message is
    /// gone, or that were cancelled, are discarded.
    pub async fn pop(&self, queue: &str) -> Result<Option<JobMessage>, QueueError> {
        let key = self.priority_key(queue);
        loop {
            let Some((member, _)) = self.store.zpop_min(&key).await? else {
                return Ok(None);
            };
            let Ok(id) = Uuid::parse_str(&member) else {
                warn!("Discarding malformed queue member '{}' from '{}'", member, queue);
                continue;
            };
            if let Some(message) = self.load_message(id).await? {
                return Ok(Some(message));
            }
            debug!("Skipping job {} without a stored message", id);
        }
    }

    /// Promote delayed jobs that are due at `now` (epoch milliseconds).
    pub async fn move_due_jobs(&self, queue: &str, now: i64) -> Result<usize, QueueError> {
        let delayed = self.delayed_key(queue);
        #[allow(clippy::cast_precision_loss)]
        let due = self
            .store
            .zrange_by_score(&delayed, now as f64, MOVE_BATCH)
            .await?;

        let mut moved = 0;
        for member in due {
            // Whoever removes the member owns the move
            if !self.store.zrem(&delayed, &member).await? {
                continue;
            }
            let Ok(id) = Uuid::parse_str(&member) else {
                continue;
            };
            if let Some(message) = self.load_message(id).await? {
                self.enqueue(&message, None).await?;
                moved += 1;
            }
        }

        if moved > 0 {
            debug!("⏰ Moved {} due job(s) to '{}'", moved, queue);
        }
        Ok(moved)
    }

    pub async fn status(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        match self.store.get(&self.status_key(id)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn write_record(&self, record: &JobRecord) -> Result<(), QueueError> {
        let payload = serde_json::to_string(record)?;
        self.store
            .set(
                &self.status_key(record.id),
                &payload,
                Some(self.status_retention),
            )
            .await?;
        Ok(())
    }

    /// Apply `update` to a job's record unless the job was cancelled.
    ///
    /// Returns whether the record was written.
    async fn update_record(
        &self,
        id: Uuid,
        update: impl FnOnce(&mut JobRecord),
    ) -> Result<bool, QueueError> {
        let Some(mut record) = self.status(id).await? else {
            return Ok(false);
        };
        if record.status == JobStatus::Cancelled {
            return Ok(false);
        }
        update(&mut record);
        record.updated_at = Utc::now();
        self.write_record(&record).await?;
        Ok(true)
    }

    /// Mark a delivered job as running; `false` when it was cancelled.
    pub async fn start(&self, message: &JobMessage) -> Result<bool, QueueError> {
        self.update_record(message.id, |record| {
            record.status = JobStatus::Running;
            record.retry_count = message.retry_count;
        })
        .await
    }

    /// Record handler progress; ignored once the job is cancelled.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: u8,
        violations_found: u64,
    ) -> Result<bool, QueueError> {
        self.update_record(id, |record| {
            record.progress = progress.min(100);
            record.violations_found = violations_found;
        })
        .await
    }

    pub async fn complete(&self, message: &JobMessage) -> Result<bool, QueueError> {
        self.store.del(&[self.message_key(message.id)]).await?;
        self.update_record(message.id, |record| {
            record.status = JobStatus::Completed;
            record.progress = 100;
            record.error = None;
            record.completed_at = Some(Utc::now());
        })
        .await
    }

    /// Handle a failed attempt: schedule a retry with exponential backoff
    /// while the budget allows, otherwise dead-letter the job.
    pub async fn fail(
        &self,
        message: &JobMessage,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, QueueError> {
        if self
            .status(message.id)
            .await?
            .is_some_and(|record| record.status == JobStatus::Cancelled)
        {
            self.store.del(&[self.message_key(message.id)]).await?;
            return Ok(FailureOutcome::Cancelled);
        }

        let attempt = message.retry_count + 1;
        if retryable && attempt <= message.max_retries {
            let mut retry = message.clone();
            retry.retry_count = attempt;
            let delay = self.retry_delay(attempt);

            self.save_message(&retry).await?;
            self.update_record(retry.id, |record| {
                record.status = JobStatus::Queued;
                record.retry_count = attempt;
                record.error = Some(reason.to_string());
            })
            .await?;
            self.enqueue(&retry, Some(delay)).await?;

            return Ok(FailureOutcome::Retried { attempt, delay });
        }

        let entry = DeadLetterEntry {
            message: message.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        self.store
            .rpush(
                &self.dead_letter_key(&message.queue),
                &serde_json::to_string(&entry)?,
            )
            .await?;
        self.store.del(&[self.message_key(message.id)]).await?;
        self.update_record(message.id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(reason.to_string());
            record.completed_at = Some(entry.failed_at);
        })
        .await?;

        error!(
            "☠️ Job {}({}) moved to dead letters of '{}': {}",
            message.job_type, message.id, message.queue, reason
        );
        Ok(FailureOutcome::DeadLettered)
    }

    /// Cancel a job. Pending jobs are removed from both delivery paths;
    /// a running handler keeps going but its later updates are dropped.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, QueueError> {
        let Some(record) = self.status(id).await? else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        let member = id.to_string();
        self.store
            .zrem(&self.priority_key(&record.queue), &member)
            .await?;
        self.store
            .zrem(&self.delayed_key(&record.queue), &member)
            .await?;
        if record.status == JobStatus::Queued {
            self.store.del(&[self.message_key(id)]).await?;
        }

        let mut cancelled = record;
        cancelled.status = JobStatus::Cancelled;
        cancelled.updated_at = Utc::now();
        cancelled.completed_at = Some(cancelled.updated_at);
        self.write_record(&cancelled).await?;

        info!("🛑 Cancelled job {}({})", cancelled.job_type, id);
        Ok(true)
    }

    pub async fn list_dead_letters(&self, queue: &str) -> Result<Vec<DeadLetterEntry>, QueueError> {
        self.store
            .lrange(&self.dead_letter_key(queue))
            .await?
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(QueueError::from))
            .collect()
    }

    /// Move every dead letter of `queue` back onto its priority path with
    /// the retry count reset.
    pub async fn requeue_dead_letters(&self, queue: &str) -> Result<usize, QueueError> {
        let entries = self.store.take_list(&self.dead_letter_key(queue)).await?;

        let mut requeued = 0;
        for payload in entries {
            let entry: DeadLetterEntry = match serde_json::from_str(&payload) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Dropping malformed dead letter in '{}': {}", queue, e);
                    continue;
                }
            };
            let mut message = entry.message;
            message.retry_count = 0;

            self.save_message(&message).await?;
            self.write_record(&JobRecord::queued(&message)).await?;
            self.enqueue(&message, None).await?;
            requeued += 1;
        }

        if requeued > 0 {
            info!("♻️ Requeued {} dead letter(s) in '{}'", requeued, queue);
        }
        Ok(requeued)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub async fn queue_depth(&self, queue: &str) -> Result<QueueDepth, QueueError> {
        Ok(QueueDepth {
            priority: self.store.zcard(&self.priority_key(queue)).await?,
            delayed: self.store.zcard(&self.delayed_key(queue)).await?,
            dead_letters: self.store.llen(&self.dead_letter_key(queue)).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> MessageQueue {
        MessageQueue::new(
            SharedStore::memory(),
            &QueueConfig {
                retry_base_delay_ms: 10,
                ..QueueConfig::default()
            },
        )
    }

    fn with_priority(priority: i32) -> PublishOptions {
        PublishOptions {
            priority,
            ..PublishOptions::default()
        }
    }

    #[tokio::test]
    async fn test_higher_priority_pops_first() {
        let queue = queue();
        let low = queue
            .publish("validation", "noop", json!({}), with_priority(1))
            .await
            .unwrap();
        let high = queue
            .publish("validation", "noop", json!({}), with_priority(5))
            .await
            .unwrap();

        assert_eq!(queue.pop("validation").await.unwrap().unwrap().id, high);
        assert_eq!(queue.pop("validation").await.unwrap().unwrap().id, low);
        assert!(queue.pop("validation").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_becomes_eligible_at_ready_time() {
        let queue = queue();
        let before = now_ms();
        let id = queue
            .publish(
                "validation",
                "noop",
                json!({}),
                PublishOptions {
                    delay: Some(Duration::from_secs(5)),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();
        let after = now_ms();

        assert_eq!(queue.move_due_jobs("validation", before + 4_999).await.unwrap(), 0);
        assert!(queue.pop("validation").await.unwrap().is_none());
        assert_eq!(queue.queue_depth("validation").await.unwrap().delayed, 1);

        assert_eq!(queue.move_due_jobs("validation", after + 5_000).await.unwrap(), 1);
        assert_eq!(queue.pop("validation").await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_retries_back_off_then_dead_letter_once() {
        let queue = queue();
        let id = queue
            .publish("validation", "noop", json!({}), with_priority(1))
            .await
            .unwrap();

        let mut delays = Vec::new();
        loop {
            queue.move_due_jobs("validation", i64::MAX).await.unwrap();
            let message = queue.pop("validation").await.unwrap().unwrap();
            match queue.fail(&message, "boom", true).await.unwrap() {
                FailureOutcome::Retried { delay, .. } => delays.push(delay),
                FailureOutcome::DeadLettered => break,
                FailureOutcome::Cancelled => panic!("job was not cancelled"),
            }
        }

        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));

        let dead = queue.list_dead_letters("validation").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.id, id);
        assert_eq!(dead[0].reason, "boom");

        queue.move_due_jobs("validation", i64::MAX).await.unwrap();
        assert!(queue.pop("validation").await.unwrap().is_none());

        let record = queue.status(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.retry_count, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let queue = queue();
        queue
            .publish("validation", "noop", json!({}), with_priority(1))
            .await
            .unwrap();
        let message = queue.pop("validation").await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&message, "bad arguments", false).await.unwrap(),
            FailureOutcome::DeadLettered
        );
    }

    #[tokio::test]
    async fn test_cancel_removes_pending_job() {
        let queue = queue();
        let id = queue
            .publish(
                "validation",
                "noop",
                json!({}),
                PublishOptions {
                    delay: Some(Duration::from_secs(60)),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(queue.cancel(id).await.unwrap());
        assert!(!queue.cancel(id).await.unwrap());
        assert_eq!(queue.queue_depth("validation").await.unwrap(), QueueDepth::default());
        assert_eq!(
            queue.status(id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancelled_running_job_ignores_further_updates() {
        let queue = queue();
        let id = queue
            .publish("validation", "noop", json!({}), with_priority(1))
            .await
            .unwrap();
        let message = queue.pop("validation").await.unwrap().unwrap();
        assert!(queue.start(&message).await.unwrap());

        assert!(queue.cancel(id).await.unwrap());
        assert!(!queue.update_progress(id, 50, 3).await.unwrap());
        assert!(!queue.complete(&message).await.unwrap());
        assert_eq!(
            queue.status(id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_requeue_dead_letters_resets_retry_count() {
        let queue = queue();
        let id = queue
            .publish("validation", "noop", json!({"rules": ["a"]}), with_priority(1))
            .await
            .unwrap();
        let message = queue.pop("validation").await.unwrap().unwrap();
        queue.fail(&message, "permanent", false).await.unwrap();

        assert_eq!(queue.requeue_dead_letters("validation").await.unwrap(), 1);
        assert!(queue.list_dead_letters("validation").await.unwrap().is_empty());

        let requeued = queue.pop("validation").await.unwrap().unwrap();
        assert_eq!(requeued.id, id);
        assert_eq!(requeued.retry_count, 0);
        assert_eq!(requeued.payload, json!({"rules": ["a"]}));
        assert_eq!(
            queue.status(id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[test]
    fn test_retry_delay_doubles() {
        let queue = queue();
        assert_eq!(queue.retry_delay(1), Duration::from_millis(20));
        assert_eq!(queue.retry_delay(2), Duration::from_millis(40));
        assert_eq!(queue.retry_delay(3), Duration::from_millis(80));
    }
}
