use clap::{Parser, Subcommand};

use crate::executor::ResultFormat;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run queue consumers, cache warming and the health endpoints (default)
    Serve,
    /// Execute validation rules and print their results
    Validate {
        /// Rule to run, repeatable (default: every rule)
        #[arg(short, long = "rule")]
        rules: Vec<String>,
        /// Run rules one after another in catalog order
        #[arg(long)]
        sequential: bool,
        /// Maximum number of rules in flight (default: configured workers)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Ignore cached results
        #[arg(long)]
        no_cache: bool,
        #[arg(short, long, value_enum, default_value_t = ResultFormat::Json)]
        format: ResultFormat,
    },
    /// Check the primary, its replicas, the pool and a test query
    Health,
    /// Run backend maintenance (statistics, vacuum, reindex)
    Optimize,
    /// Validate the database configuration and time a connection
    SelfTest,
    /// Move schema and data to the configured migration target
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Inspect and operate the job queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Analyze the source and store a migration plan
    Plan { id: String },
    /// Execute a migration, planning it first when needed
    Run { id: String },
    /// Show the progress of a migration
    Status { id: String },
    /// Undo the steps of a finished migration
    Rollback { id: String },
}

#[derive(Subcommand)]
pub enum QueueAction {
    /// List dead-lettered jobs
    DeadLetters {
        /// Queue name (default: the validation job queue)
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// Move dead-lettered jobs back onto the queue
    Requeue {
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// Show a job's status, or the queue depth when no job is given
    Status {
        job_id: Option<uuid::Uuid>,
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// Cancel a pending or running job
    Cancel { job_id: uuid::Uuid },
}
