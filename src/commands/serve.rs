use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    app::App,
    commands::build_app,
    config::Config,
    environment::Environment,
    executor::job_registry,
    queue::{spawn_consumer, spawn_delayed_mover, Consumer},
    router::router,
};

pub async fn handle_serve_command(environment: Environment, config: Config) {
    let port = config.server.port;
    let app = build_app(environment, config).await;

    let queue_name = app.executor.job_queue_name().to_string();
    let consumer = Arc::new(Consumer::new(
        "validation-consumer",
        queue_name.clone(),
        app.queue.clone(),
        job_registry(),
        Arc::clone(&app.executor),
        &app.config.queue,
    ));
    let consumer_task = spawn_consumer(consumer);
    let mover_task = spawn_delayed_mover(
        app.queue.clone(),
        vec![queue_name],
        Duration::from_millis(app.config.queue.delayed_mover_interval_ms),
    );

    if app.config.executor.warm_on_startup {
        let executor = Arc::clone(&app.executor);
        tokio::spawn(async move {
            let outcome = executor.warm_cache().await;
            info!("🔥 Cache warming finished: {:?}", outcome);
        });
    }

    start_server(app.clone(), port).await;

    consumer_task.abort();
    mover_task.abort();
    app.shutdown().await;
    info!("👋 Shut down");
}

async fn start_server(app: App, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("❌ Failed to bind {}: {}", addr, e);
            return;
        }
    };

    info!("🌐 Server starting on http://{}", addr);
    if let Err(e) = axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server error: {}", e);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
