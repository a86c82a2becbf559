use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::JobStatus;

/// Body delivered to a job's callback target once it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub completed_at: DateTime<Utc>,
    pub violations_found: u64,
}

/// Where completion notices go. Delivery failures are logged, never raised.
#[derive(Debug, Clone, Default)]
pub enum CompletionPort {
    #[default]
    Disabled,
    /// POST the notice as JSON to the job's callback URL
    Http(reqwest::Client),
    /// Hand `(callback, notice)` to an in-process receiver
    Channel(UnboundedSender<(String, CompletionNotice)>),
}

impl CompletionPort {
    #[must_use]
    pub fn http() -> Self {
        Self::Http(reqwest::Client::new())
    }

    /// Deliver `notice` to `target`. Jobs without a target are skipped.
    pub async fn notify(&self, target: Option<&str>, notice: &CompletionNotice) {
        let Some(target) = target else {
            return;
        };

        match self {
            Self::Disabled => {}
            Self::Http(client) => match client.post(target).json(notice).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("📨 Delivered completion of job {} to {}", notice.job_id, target);
                }
                Ok(response) => warn!(
                    "Callback {} for job {} answered {}",
                    target,
                    notice.job_id,
                    response.status()
                ),
                Err(e) => warn!(
                    "Failed to deliver completion of job {} to {}: {}",
                    notice.job_id, target, e
                ),
            },
            Self::Channel(sender) => {
                if sender.send((target.to_string(), notice.clone())).is_err() {
                    warn!("Completion receiver for job {} is gone", notice.job_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn notice() -> CompletionNotice {
        CompletionNotice {
            job_id: Uuid::new_v4(),
            status: JobStatus::Completed,
            completed_at: Utc::now(),
            violations_found: 4,
        }
    }

    #[tokio::test]
    async fn test_channel_port_only_fires_with_a_target() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let port = CompletionPort::Channel(sender);
        let notice = notice();

        port.notify(None, &notice).await;
        assert!(receiver.try_recv().is_err());

        port.notify(Some("https://example.test/hook"), &notice).await;
        let (target, delivered) = receiver.try_recv().unwrap();
        assert_eq!(target, "https://example.test/hook");
        assert_eq!(delivered, notice);
    }

    #[tokio::test]
    async fn test_unreachable_http_target_is_not_fatal() {
        CompletionPort::http()
            .notify(Some("http://127.0.0.1:9/callback"), &notice())
            .await;
    }

    #[test]
    fn test_notice_wire_format() {
        let notice = notice();
        let body = serde_json::to_value(&notice).unwrap();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["violations_found"], 4);
        assert_eq!(body["job_id"], notice.job_id.to_string());
    }
}
