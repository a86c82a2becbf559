use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub success: bool,
    pub duration: Duration,
    pub records: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub id: String,
    pub status: MigrationStatus,
    /// Index of the step being (or last) executed
    pub current_step: usize,
    pub total_steps: usize,
    pub records_migrated: u64,
    pub records_total: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Outcome of every attempted step, in execution order
    pub steps: Vec<StepOutcome>,
    pub note: Option<String>,
}

impl MigrationProgress {
    #[must_use]
    pub fn new(id: &str, total_steps: usize, records_total: u64) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            status: MigrationStatus::Pending,
            current_step: 0,
            total_steps,
            records_migrated: 0,
            records_total,
            started_at: now,
            updated_at: now,
            elapsed: Duration::ZERO,
            errors: Vec::new(),
            warnings: Vec::new(),
            steps: Vec::new(),
            note: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.elapsed = (self.updated_at - self.started_at)
            .to_std()
            .unwrap_or_default();
    }

    #[must_use]
    pub fn attempted(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.step_id == step_id)
    }

    #[must_use]
    pub fn succeeded(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.step_id == step_id && s.success)
    }
}
