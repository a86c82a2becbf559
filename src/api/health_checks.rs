use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::{
    app::{App, ReadinessError},
    cache::CacheStatsSnapshot,
    circuit_breaker::CircuitBreakerStatus,
    queue::QueueDepth,
};

pub async fn ok() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness(State(app): State<App>) -> Result<StatusCode, ReadinessError> {
    app.readiness().await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub circuit_breakers: Vec<CircuitBreakerStatus>,
    pub cache: CacheStatsSnapshot,
    /// `None` when the queue store could not be read
    pub queue: Option<QueueDepth>,
}

/// Operational snapshot: breakers, cache counters and job queue depth.
pub async fn status(State(app): State<App>) -> Json<StatusResponse> {
    let queue = app
        .queue
        .queue_depth(app.executor.job_queue_name())
        .await
        .ok();

    Json(StatusResponse {
        circuit_breakers: app.breakers.statuses(),
        cache: app.cache.stats(),
        queue,
    })
}
