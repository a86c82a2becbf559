pub mod health;
pub mod migrate;
pub mod optimize;
pub mod queue;
pub mod serve;
pub mod validate;
pub mod version;

use std::{process, sync::Arc};

use crate::{
    app::App,
    config::DatabaseConfig,
    database::{DatabaseAdapter, DatabaseFactory},
    environment::Environment,
};

/// Build the service context or exit with the startup error.
pub(crate) async fn build_app(environment: Environment, config: crate::config::Config) -> App {
    match App::build(environment, config).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start: {e}");
            process::exit(1);
        }
    }
}

/// A connected adapter for one-shot commands that need nothing else.
pub(crate) async fn connect_adapter(config: &DatabaseConfig) -> Arc<dyn DatabaseAdapter> {
    let adapter = match DatabaseFactory::build(config) {
        Ok(adapter) => adapter,
        Err(e) => {
            eprintln!("❌ Invalid database configuration: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = adapter.initialize().await {
        eprintln!("❌ Failed to connect to {}: {e}", adapter.name());
        process::exit(1);
    }
    adapter
}
