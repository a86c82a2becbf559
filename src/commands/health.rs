use std::process;

use crate::{
    commands::connect_adapter,
    config::Config,
    database::{health::EndpointHealth, HealthStatus},
};

pub async fn handle_health_command(config: &Config) {
    let adapter = connect_adapter(&config.database).await;
    let report = adapter.health_check().await;
    adapter.close().await;

    let icon = match report.status {
        HealthStatus::Healthy => "✅",
        HealthStatus::Warning => "⚠️",
        HealthStatus::Error => "❌",
    };
    println!("{icon} {} ({})", report.status, report.backend);
    println!();

    println!("🗄️  Primary: {}", describe(&report.primary));
    for replica in &report.replicas {
        println!("📚 Replica: {}", describe(replica));
    }
    for shard in &report.shards {
        println!("🧩 Shard {}: {}", shard.shard_id, shard.report.status);
    }

    println!(
        "🏊 Pool: {}/{} open, {} idle ({:.0}% in use)",
        report.pool.size,
        report.pool.max,
        report.pool.idle,
        report.pool.occupancy_pct()
    );
    match (&report.test_query.latency, &report.test_query.error) {
        (_, Some(error)) => println!("🧪 Test query failed: {error}"),
        (Some(latency), None) => println!(
            "🧪 Test query: {latency:?} (bound {:?})",
            report.test_query.bound
        ),
        (None, None) => println!("🧪 Test query: not run"),
    }

    if report.status == HealthStatus::Error {
        process::exit(1);
    }
}

fn describe(endpoint: &EndpointHealth) -> String {
    match (&endpoint.error, endpoint.latency) {
        (Some(error), _) => format!("{} unreachable: {error}", endpoint.url),
        (None, Some(latency)) => format!("{} reachable in {latency:?}", endpoint.url),
        (None, None) => format!("{} reachable", endpoint.url),
    }
}
