use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::{FailureOutcome, JobMessage, JobRegistry, JobResult, MessageQueue, QueueError};
use crate::config::QueueConfig;

/// Pulls jobs off one queue and runs them through the registry, at most
/// `concurrency` at a time.
#[derive(Debug)]
pub struct Consumer<C> {
    name: String,
    queue_name: String,
    queue: MessageQueue,
    registry: JobRegistry<C>,
    context: C,
    permits: Arc<Semaphore>,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl<C: Clone + Send + Sync + 'static> Consumer<C> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue_name: impl Into<String>,
        queue: MessageQueue,
        registry: JobRegistry<C>,
        context: C,
        config: &QueueConfig,
    ) -> Self {
        Self {
            name: name.into(),
            queue_name: queue_name.into(),
            queue,
            registry,
            context,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Pop and process one job inline. Returns whether a job was found.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(message) = self.queue.pop(&self.queue_name).await? else {
            return Ok(false);
        };
        self.handle(message).await?;
        Ok(true)
    }

    /// Consume until the store fails. Each job runs on its own task while
    /// holding a permit.
    pub async fn run(self: Arc<Self>) -> Result<(), QueueError> {
        debug!(
            "Consumer '{}' handles {:?}",
            self.name,
            self.registry.job_names().collect::<Vec<_>>()
        );
        loop {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| QueueError::Stopped(self.name.clone()))?;

            let Some(message) = self.queue.pop(&self.queue_name).await? else {
                drop(permit);
                sleep(self.poll_interval).await;
                continue;
            };

            debug!(
                "🔧 Consumer '{}' claimed {}({})",
                self.name, message.job_type, message.id
            );

            let consumer = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = consumer.handle(message).await {
                    error!("❌ Consumer '{}' failed to settle a job: {}", consumer.name, e);
                }
            });
        }
    }

    async fn handle(&self, message: JobMessage) -> Result<(), QueueError> {
        if !self.queue.start(&message).await? {
            debug!("Skipping cancelled job {}({})", message.job_type, message.id);
            return Ok(());
        }

        let start_time = Instant::now();
        let result = timeout(
            self.job_timeout,
            self.registry.execute(&self.context, &message),
        )
        .await
        .unwrap_or(JobResult::TimedOut);
        let execution_duration = start_time.elapsed();

        match result {
            JobResult::Completed => {
                self.queue.complete(&message).await?;
                info!(
                    "✅ Consumer '{}' completed job {}({}) in {:?}",
                    self.name, message.job_type, message.id, execution_duration
                );
            }
            result => {
                let reason = match &result {
                    JobResult::TimedOut => "Timed out".to_string(),
                    other => other.to_string(),
                };
                match self
                    .queue
                    .fail(&message, &reason, result.is_retryable())
                    .await?
                {
                    FailureOutcome::Retried { attempt, delay } => warn!(
                        "⚠️ Consumer '{}' retrying job {}({}) in {:?} (attempt {}): {}",
                        self.name, message.job_type, message.id, delay, attempt, reason
                    ),
                    FailureOutcome::DeadLettered => {
                        error!(
                            "❌ Consumer '{}' failed job {}({}) in {:?}: {}",
                            self.name, message.job_type, message.id, execution_duration, reason
                        );
                        self.registry
                            .dead_lettered(&self.context, &message, &reason)
                            .await;
                    }
                    FailureOutcome::Cancelled => debug!(
                        "Job {}({}) was cancelled while running",
                        message.job_type, message.id
                    ),
                }
            }
        }

        Ok(())
    }
}
