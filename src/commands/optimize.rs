use std::process;

use crate::{commands::connect_adapter, config::Config};

pub async fn handle_optimize_command(config: &Config) {
    let adapter = connect_adapter(&config.database).await;
    println!("Optimizing {}...", adapter.name());

    let outcomes = adapter.optimize().await;
    adapter.close().await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.error {
            None => println!("  ✅ {} ({:?})", outcome.operation, outcome.duration),
            Some(error) => {
                failed += 1;
                println!("  ❌ {} ({:?}): {error}", outcome.operation, outcome.duration);
            }
        }
    }

    println!();
    if failed > 0 {
        println!("⚠️ {failed} of {} operation(s) failed", outcomes.len());
        process::exit(1);
    }
    println!("✅ {} operation(s) completed", outcomes.len());
}
