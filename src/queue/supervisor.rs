use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::{now_ms, Consumer, MessageQueue};

const RESTART_DELAY: Duration = Duration::from_secs(10);

/// Run a consumer on its own task, restarting it whenever its loop crashes.
pub fn spawn_consumer<C: Clone + Send + Sync + 'static>(
    consumer: Arc<Consumer<C>>,
) -> JoinHandle<()> {
    info!(
        "⚡ Starting consumer '{}' for queue '{}'",
        consumer.name(),
        consumer.queue_name()
    );

    tokio::spawn(async move {
        let mut restart_count = 0;
        loop {
            debug!(
                "Starting consumer '{}' (restart #{})",
                consumer.name(),
                restart_count
            );

            if let Err(e) = Arc::clone(&consumer).run().await {
                error!(
                    "💥 Consumer '{}' crashed (restart #{}) - error: {}",
                    consumer.name(),
                    restart_count,
                    e
                );
            }

            restart_count += 1;
            sleep(RESTART_DELAY + Duration::from_millis(fastrand::u64(0..2000))).await;
        }
    })
}

/// Periodically promote due delayed jobs of every listed queue.
pub fn spawn_delayed_mover(
    queue: MessageQueue,
    queue_names: Vec<String>,
    interval: Duration,
) -> JoinHandle<()> {
    info!("⏰ Starting delayed job mover for {:?}", queue_names);

    tokio::spawn(async move {
        loop {
            for name in &queue_names {
                if let Err(e) = queue.move_due_jobs(name, now_ms()).await {
                    error!("❌ Failed to move delayed jobs of '{}': {}", name, e);
                }
            }
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::PublishOptions;
    use crate::store::SharedStore;

    #[tokio::test(start_paused = true)]
    async fn test_mover_promotes_due_jobs() {
        let queue = MessageQueue::new(SharedStore::memory(), &QueueConfig::default());
        queue
            .publish(
                "jobs",
                "noop",
                serde_json::json!({}),
                PublishOptions {
                    delay: Some(Duration::from_millis(1)),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();

        // Delayed scores use the wall clock, so wait for it in real time.
        std::thread::sleep(Duration::from_millis(5));

        let mover = spawn_delayed_mover(queue.clone(), vec!["jobs".to_string()], Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        mover.abort();

        assert!(queue.pop("jobs").await.unwrap().is_some());
    }
}
