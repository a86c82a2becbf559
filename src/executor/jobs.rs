use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::QueryExecutor;
use crate::queue::{Job, JobError, JobMessage, JobRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationJobArguments {
    /// Rules to run; every catalog rule when absent
    #[serde(default)]
    pub rules: Option<Vec<String>>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

const fn default_use_cache() -> bool {
    true
}

/// Runs a batch of validation rules off the request path.
pub struct ValidationJob;

impl Job for ValidationJob {
    type Context = Arc<QueryExecutor>;
    type Arguments = ValidationJobArguments;

    async fn execute(
        executor: &Self::Context,
        message: &JobMessage,
        arguments: Self::Arguments,
    ) -> Result<(), JobError> {
        executor.run_job(message, arguments).await
    }

    fn name() -> &'static str {
        "validation"
    }

    async fn dead_lettered(executor: &Self::Context, message: &JobMessage, reason: &str) {
        executor.job_dead_lettered(message, reason).await;
    }
}

/// Registry of every job the executor knows how to run.
#[must_use]
pub fn job_registry() -> JobRegistry<Arc<QueryExecutor>> {
    let mut registry = JobRegistry::new();
    registry.register_job::<ValidationJob>();
    registry
}
