use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{api, app::App};

pub fn router(app: App) -> Router {
    Router::new()
        .route("/liveness", get(api::health_checks::ok))
        .route("/readiness", get(api::health_checks::readiness))
        .route("/status", get(api::health_checks::status))
        .with_state(app)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, environment::Environment};
    use axum_test::TestServer;
    use tempfile::TempDir;

    async fn server(dir: &TempDir) -> TestServer {
        server_on(dir.path().join("providers.db")).await
    }

    async fn server_on(database: std::path::PathBuf) -> TestServer {
        let config: Config = serde_json::from_value(serde_json::json!({
            "database": {
                "backend": "sqlite",
                "database": database.to_string_lossy(),
            },
            "validation": {
                "rules": {
                    "npi_validation": {
                        "query": "SELECT 1 AS npi WHERE 1 = 0",
                        "severity": "CRITICAL",
                    },
                },
            },
        }))
        .unwrap();
        let app = App::build(Environment::Test, config).await.unwrap();
        TestServer::new(router(app)).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_and_readiness() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        server.get("/liveness").await.assert_status_ok();
        server.get("/readiness").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_status_reports_queue_and_cache() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let response = server.get("/status").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert!(body["circuit_breakers"].is_array());
        assert_eq!(body["queue"]["priority"], 0);
        assert!(body.get("cache").is_some());
    }

    #[tokio::test]
    async fn test_unreachable_database_starts_degraded() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-mounted");
        let server = server_on(missing.join("providers.db")).await;

        server.get("/liveness").await.assert_status_ok();
        server
            .get("/readiness")
            .await
            .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);

        std::fs::create_dir(&missing).unwrap();
        server.get("/readiness").await.assert_status_ok();
    }
}
