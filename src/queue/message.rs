use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Unit of queued work as it is stored between deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: Uuid,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher values are delivered first
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// URL notified when the job reaches a terminal state
    pub callback: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Queryable state of a job, kept after the message itself is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: String,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: u8,
    pub violations_found: u64,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    #[must_use]
    pub fn queued(message: &JobMessage) -> Self {
        Self {
            id: message.id,
            queue: message.queue.clone(),
            job_type: message.job_type.clone(),
            status: JobStatus::Queued,
            progress: 0,
            violations_found: 0,
            retry_count: message.retry_count,
            error: None,
            created_at: message.created_at,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message: JobMessage,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}
