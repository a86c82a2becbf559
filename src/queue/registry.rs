use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{Job, JobError, JobMessage};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type JobExecutor<C> =
    Arc<dyn Fn(C, JobMessage) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;
type DeadLetterHook<C> = Arc<dyn Fn(C, JobMessage, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Result of one delivery attempt.
#[derive(Debug)]
pub enum JobResult {
    Completed,
    Failed(JobError),
    TimedOut,
}

impl JobResult {
    /// Whether another attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(JobError::TryAgainLater(_)) | Self::TimedOut)
    }
}

impl Display for JobResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(e) => write!(f, "error: {e}"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Handlers by job type, all sharing one context type.
pub struct JobRegistry<C> {
    jobs: HashMap<&'static str, JobExecutor<C>>,
    dead_letter_hooks: HashMap<&'static str, DeadLetterHook<C>>,
}

impl<C: Clone + Send + Sync + 'static> JobRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            dead_letter_hooks: HashMap::new(),
        }
    }

    pub fn register_job<J: Job<Context = C> + 'static>(&mut self) {
        self.jobs.insert(
            J::name(),
            Arc::new(|context: C, message: JobMessage| {
                Box::pin(async move {
                    let arguments: J::Arguments = serde_json::from_value(message.payload.clone())
                        .map_err(|e| {
                            JobError::FailPermanently(format!("Failed to parse job arguments: {e}"))
                        })?;
                    J::execute(&context, &message, arguments).await
                })
            }),
        );
        self.dead_letter_hooks.insert(
            J::name(),
            Arc::new(|context: C, message: JobMessage, reason: String| {
                Box::pin(async move { J::dead_lettered(&context, &message, &reason).await })
            }),
        );
    }

    pub fn job_names(&self) -> impl Iterator<Item = &&'static str> {
        self.jobs.keys()
    }

    pub(crate) async fn execute(&self, context: &C, message: &JobMessage) -> JobResult {
        if let Some(executor) = self.jobs.get(message.job_type.as_str()) {
            match executor(context.clone(), message.clone()).await {
                Ok(()) => JobResult::Completed,
                Err(e) => JobResult::Failed(e),
            }
        } else {
            JobResult::Failed(JobError::FailPermanently(format!(
                "No job registered for job type: {}",
                message.job_type
            )))
        }
    }

    /// Tell the job's handler it will not run again. Unknown job types have
    /// nobody to tell.
    pub(crate) async fn dead_lettered(&self, context: &C, message: &JobMessage, reason: &str) {
        if let Some(hook) = self.dead_letter_hooks.get(message.job_type.as_str()) {
            hook(context.clone(), message.clone(), reason.to_string()).await;
        }
    }
}

impl<C: Clone + Send + Sync + 'static> Default for JobRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for JobRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            dead_letter_hooks: self.dead_letter_hooks.clone(),
        }
    }
}

impl<C> fmt::Debug for JobRegistry<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}
