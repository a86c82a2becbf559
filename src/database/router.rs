use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use sea_orm::{ConnectionTrait, DatabaseConnection};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::health::{redact_url, EndpointHealth};
use super::{connect, connect_lazy, DatabaseError};
use crate::config::{BackendKind, DatabaseConfig};

/// Upper bound of a reachability probe.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct Replica {
    url: String,
    connection: DatabaseConnection,
    healthy: AtomicBool,
}

/// Primary connection plus read replicas selected round-robin.
///
/// A replica that fails a probe is skipped until a later probe succeeds;
/// with no healthy replica left, reads fall back to the primary.
pub(crate) struct ReplicaRouter {
    primary: DatabaseConnection,
    primary_url: String,
    replicas: Vec<Replica>,
    next: AtomicUsize,
}

impl ReplicaRouter {
    /// Connect the primary eagerly and the replicas lazily.
    ///
    /// The primary must be reachable; a replica that is down only degrades
    /// health.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let primary_url = config.connection_url();
        let primary = connect(&primary_url, config.pool_size).await?;
        ensure_backend(&primary, config.backend, &primary_url)?;

        let mut replicas = Vec::with_capacity(config.read_replicas.len());
        for url in &config.read_replicas {
            let connection = connect_lazy(url, config.pool_size).await?;
            ensure_backend(&connection, config.backend, url)?;
            replicas.push(Replica {
                url: url.clone(),
                connection,
                healthy: AtomicBool::new(true),
            });
        }

        let router = Self {
            primary,
            primary_url,
            replicas,
            next: AtomicUsize::new(0),
        };

        if !router.replicas.is_empty() {
            let reports = router.probe_replicas(PROBE_TIMEOUT).await;
            let healthy = reports.iter().filter(|r| r.reachable).count();
            info!(
                "📚 {} of {} read replicas reachable for {}",
                healthy,
                reports.len(),
                redact_url(&router.primary_url)
            );
        }

        Ok(router)
    }

    pub const fn primary(&self) -> &DatabaseConnection {
        &self.primary
    }

    pub fn primary_url(&self) -> String {
        redact_url(&self.primary_url)
    }

    /// Connection for the next read, with the replica index when one was chosen.
    pub fn read_target(&self) -> (Option<usize>, &DatabaseConnection) {
        let healthy: Vec<usize> = self
            .replicas
            .iter()
            .enumerate()
            .filter(|(_, replica)| replica.healthy.load(Ordering::Acquire))
            .map(|(index, _)| index)
            .collect();

        if healthy.is_empty() {
            return (None, &self.primary);
        }

        let slot = self.next.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let index = healthy[slot];
        (Some(index), &self.replicas[index].connection)
    }

    pub fn mark_unhealthy(&self, index: usize, reason: &str) {
        if let Some(replica) = self.replicas.get(index) {
            if replica.healthy.swap(false, Ordering::AcqRel) {
                warn!(
                    "⚠️ Read replica {} marked unhealthy: {}",
                    redact_url(&replica.url),
                    reason
                );
            }
        }
    }

    /// Whether a replica still answers; marks it unhealthy when it does not.
    pub async fn verify_replica(&self, index: usize) -> bool {
        let Some(replica) = self.replicas.get(index) else {
            return false;
        };
        match probe(&replica.connection, PROBE_TIMEOUT).await {
            Ok(_) => true,
            Err(reason) => {
                self.mark_unhealthy(index, &reason);
                false
            }
        }
    }

    pub async fn probe_primary(&self, bound: Duration) -> EndpointHealth {
        endpoint_health(self.primary_url(), probe(&self.primary, bound).await)
    }

    /// Probe every replica and refresh its health flag.
    pub async fn probe_replicas(&self, bound: Duration) -> Vec<EndpointHealth> {
        let mut reports = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            let outcome = probe(&replica.connection, bound).await;
            let reachable = outcome.is_ok();
            let was_healthy = replica.healthy.swap(reachable, Ordering::AcqRel);
            if reachable && !was_healthy {
                info!("✅ Read replica {} is reachable again", redact_url(&replica.url));
            } else if !reachable && was_healthy {
                warn!("⚠️ Read replica {} is unreachable", redact_url(&replica.url));
            }
            reports.push(endpoint_health(redact_url(&replica.url), outcome));
        }
        reports
    }

    pub async fn close(&self) {
        for replica in &self.replicas {
            if let Err(e) = replica.connection.clone().close().await {
                debug!("Failed to close replica pool: {}", e);
            }
        }
        if let Err(e) = self.primary.clone().close().await {
            debug!("Failed to close primary pool: {}", e);
        }
    }
}

fn ensure_backend(
    connection: &DatabaseConnection,
    expected: BackendKind,
    url: &str,
) -> Result<(), DatabaseError> {
    if connection.get_database_backend() == expected.db_backend() {
        Ok(())
    } else {
        Err(DatabaseError::Configuration(format!(
            "{} is not a {} connection URL",
            redact_url(url),
            expected
        )))
    }
}

async fn probe(connection: &DatabaseConnection, bound: Duration) -> Result<Duration, String> {
    let started = Instant::now();
    match timeout(bound, connection.ping()).await {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {}ms", bound.as_millis())),
    }
}

fn endpoint_health(url: String, outcome: Result<Duration, String>) -> EndpointHealth {
    match outcome {
        Ok(latency) => EndpointHealth {
            url,
            reachable: true,
            latency: Some(latency),
            error: None,
        },
        Err(error) => EndpointHealth {
            url,
            reachable: false,
            latency: None,
            error: Some(error),
        },
    }
}
