use std::process;

use crate::{
    cli::QueueAction,
    commands::build_app,
    config::Config,
    environment::Environment,
    queue::{JobRecord, MessageQueue, QueueError},
};

pub async fn handle_queue_command(environment: Environment, config: Config, action: QueueAction) {
    let app = build_app(environment, config).await;
    let default_queue = app.executor.job_queue_name().to_string();

    let result = handle_queue_action(&app.queue, &default_queue, action).await;
    app.shutdown().await;

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("❌ Queue operation failed: {e}");
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the requested job could not be found or changed.
pub async fn handle_queue_action(
    queue: &MessageQueue,
    default_queue: &str,
    action: QueueAction,
) -> Result<bool, QueueError> {
    match action {
        QueueAction::DeadLetters { queue: name } => {
            let name = name.as_deref().unwrap_or(default_queue);
            let entries = queue.list_dead_letters(name).await?;
            if entries.is_empty() {
                println!("No dead-lettered jobs in '{name}'");
            }
            for entry in &entries {
                println!(
                    "💀 {} {} (retries: {}, failed at {}): {}",
                    entry.message.id,
                    entry.message.job_type,
                    entry.message.retry_count,
                    entry.failed_at.to_rfc3339(),
                    entry.reason
                );
            }
        }
        QueueAction::Requeue { queue: name } => {
            let name = name.as_deref().unwrap_or(default_queue);
            let moved = queue.requeue_dead_letters(name).await?;
            println!("♻️ Requeued {moved} job(s) on '{name}'");
        }
        QueueAction::Status {
            job_id: Some(id),
            ..
        } => match queue.status(id).await? {
            Some(record) => print_record(&record),
            None => {
                println!("❓ Job {id} not found");
                return Ok(false);
            }
        },
        QueueAction::Status {
            job_id: None,
            queue: name,
        } => {
            let name = name.as_deref().unwrap_or(default_queue);
            let depth = queue.queue_depth(name).await?;
            println!("📬 Queue '{name}'");
            println!("  Ready:        {}", depth.priority);
            println!("  Delayed:      {}", depth.delayed);
            println!("  Dead letters: {}", depth.dead_letters);
        }
        QueueAction::Cancel { job_id } => {
            if !queue.cancel(job_id).await? {
                println!("⚠️ Job {job_id} is unknown or already finished");
                return Ok(false);
            }
            println!("🛑 Job {job_id} cancelled");
        }
    }
    Ok(true)
}

fn print_record(record: &JobRecord) {
    println!("📄 Job {} ({} on '{}')", record.id, record.job_type, record.queue);
    println!("  Status:     {}", record.status);
    println!("  Progress:   {}%", record.progress);
    println!("  Violations: {}", record.violations_found);
    println!("  Retries:    {}", record.retry_count);
    if let Some(error) = &record.error {
        println!("  Error:      {error}");
    }
    if let Some(completed_at) = record.completed_at {
        println!("  Completed:  {}", completed_at.to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::{JobStatus, PublishOptions};
    use crate::store::SharedStore;

    fn queue() -> MessageQueue {
        MessageQueue::new(SharedStore::memory(), &QueueConfig::default())
    }

    #[tokio::test]
    async fn test_cancel_marks_job_cancelled() {
        let queue = queue();
        let id = queue
            .publish("validation", "validation", serde_json::json!({}), PublishOptions::default())
            .await
            .unwrap();

        let changed = handle_queue_action(&queue, "validation", QueueAction::Cancel { job_id: id })
            .await
            .unwrap();

        assert!(changed);
        let record = queue.status(id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_status_of_unknown_job_reports_not_found() {
        let queue = queue();

        let found = handle_queue_action(
            &queue,
            "validation",
            QueueAction::Status {
                job_id: Some(uuid::Uuid::new_v4()),
                queue: None,
            },
        )
        .await
        .unwrap();

        assert!(!found);
    }

    #[tokio::test]
    async fn test_queue_depth_uses_default_queue() {
        let queue = queue();

        let ok = handle_queue_action(
            &queue,
            "validation",
            QueueAction::Status {
                job_id: None,
                queue: None,
            },
        )
        .await
        .unwrap();

        assert!(ok);
    }
}
