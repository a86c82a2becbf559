use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use strum::Display;

use crate::config::BackendKind;

/// Pool occupancy at or above this percentage degrades health to `Warning`.
const POOL_SATURATION_PCT: f64 = 90.0;

static URL_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://([^:/@]+):[^@]*@").expect("valid password regex"));

/// Replace the password of a connection URL before it reaches logs or reports.
#[must_use]
pub fn redact_url(url: &str) -> String {
    URL_PASSWORD.replace(url, "://$1:***@").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub url: String,
    pub reachable: bool,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open
    pub size: u32,
    /// Open connections not checked out
    pub idle: usize,
    /// Configured maximum
    pub max: u32,
}

impl PoolStats {
    #[must_use]
    pub fn occupancy_pct(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        let in_use = (self.size as usize).saturating_sub(self.idle);
        #[allow(clippy::cast_precision_loss)]
        let pct = in_use as f64 / f64::from(self.max) * 100.0;
        pct
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestQueryHealth {
    pub success: bool,
    pub latency: Option<Duration>,
    pub bound: Duration,
    pub error: Option<String>,
}

impl TestQueryHealth {
    #[must_use]
    pub fn within_bound(&self) -> bool {
        self.success && self.latency.is_some_and(|latency| latency <= self.bound)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardHealth {
    pub shard_id: u32,
    pub report: HealthReport,
}

/// Result of `health_check` on an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub backend: BackendKind,
    pub primary: EndpointHealth,
    pub replicas: Vec<EndpointHealth>,
    pub pool: PoolStats,
    pub test_query: TestQueryHealth,
    #[serde(default)]
    pub shards: Vec<ShardHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Assemble a report and derive its overall status.
    ///
    /// `Error` when the primary is unreachable, `Healthy` only when the
    /// primary, every replica, the pool and the test query are all green,
    /// `Warning` otherwise.
    #[must_use]
    pub fn evaluate(
        backend: BackendKind,
        primary: EndpointHealth,
        replicas: Vec<EndpointHealth>,
        pool: PoolStats,
        test_query: TestQueryHealth,
    ) -> Self {
        let status = if !primary.reachable {
            HealthStatus::Error
        } else if replicas.iter().all(|r| r.reachable)
            && pool.occupancy_pct() < POOL_SATURATION_PCT
            && test_query.within_bound()
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        Self {
            status,
            backend,
            primary,
            replicas,
            pool,
            test_query,
            shards: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn unreachable_replicas(&self) -> Vec<&EndpointHealth> {
        self.replicas.iter().filter(|r| !r.reachable).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(reachable: bool) -> EndpointHealth {
        EndpointHealth {
            url: "postgres://db".to_string(),
            reachable,
            latency: reachable.then(|| Duration::from_millis(2)),
            error: (!reachable).then(|| "connection refused".to_string()),
        }
    }

    fn test_query(latency_ms: u64) -> TestQueryHealth {
        TestQueryHealth {
            success: true,
            latency: Some(Duration::from_millis(latency_ms)),
            bound: Duration::from_millis(100),
            error: None,
        }
    }

    fn pool() -> PoolStats {
        PoolStats {
            size: 2,
            idle: 1,
            max: 10,
        }
    }

    #[test]
    fn test_all_green_is_healthy() {
        let report = HealthReport::evaluate(
            BackendKind::Postgres,
            endpoint(true),
            vec![endpoint(true)],
            pool(),
            test_query(5),
        );
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_degraded_replica_is_warning() {
        let report = HealthReport::evaluate(
            BackendKind::Postgres,
            endpoint(true),
            vec![endpoint(true), endpoint(false)],
            pool(),
            test_query(5),
        );
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.unreachable_replicas().len(), 1);
    }

    #[test]
    fn test_slow_test_query_is_warning() {
        let report = HealthReport::evaluate(
            BackendKind::Mysql,
            endpoint(true),
            Vec::new(),
            pool(),
            test_query(500),
        );
        assert_eq!(report.status, HealthStatus::Warning);
    }

    #[test]
    fn test_unreachable_primary_is_error() {
        let report = HealthReport::evaluate(
            BackendKind::Sqlite,
            endpoint(false),
            Vec::new(),
            PoolStats::default(),
            test_query(1),
        );
        assert_eq!(report.status, HealthStatus::Error);
    }

    #[test]
    fn test_redact_url_hides_password() {
        assert_eq!(
            redact_url("postgres://dq:s3cret@db:5432/providers"),
            "postgres://dq:***@db:5432/providers"
        );
        assert_eq!(redact_url("sqlite:///tmp/a.db"), "sqlite:///tmp/a.db");
    }
}
