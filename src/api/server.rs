use std::net::SocketAddr;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_check, list_connections, list_tables, open_alerts, recent_checks, register_connection,
    register_table, remove_connection, remove_table, run_cycle, suppress_table, unsuppress_table,
    AppState,
};
use crate::alerts::{AlertLifecycleManager, Notifier};
use crate::baseline::BaselineEngine;
use crate::catalog::TableCatalog;
use crate::check::{CheckExecutor, CheckRunner};
use crate::config::Settings;
use crate::guardrail::GuardrailController;
use crate::replica::{PgSessionFactory, ReplicaRegistry, SessionFactory};
use crate::scheduler::CheckScheduler;
use crate::sink::{CheckSink, MemorySink};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub scheduler_tick_secs: u64,
    pub settings: Settings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            scheduler_tick_secs: 30,
            settings: Settings::default(),
        }
    }
}

/// Wire up the full service graph around a session factory. The factory
/// is injectable so tests can run the whole surface against a mock
/// replica.
pub fn build_state(settings: Settings, factory: Arc<dyn SessionFactory>) -> Arc<AppState> {
    let settings = Arc::new(settings);
    let guardrails = Arc::new(GuardrailController::new(
        settings.default_guardrails.clone(),
    ));
    let registry = Arc::new(ReplicaRegistry::new(Arc::clone(&guardrails), factory));
    let baselines = Arc::new(BaselineEngine::new(settings.baseline_window_size));
    let catalog = Arc::new(TableCatalog::new());
    let alerts = Arc::new(AlertLifecycleManager::new(
        settings.alert_threshold_failures,
    ));
    let sink = Arc::new(MemorySink::default());

    let executor = CheckExecutor::new(
        Arc::clone(&registry),
        guardrails,
        baselines,
        Arc::clone(&settings),
    );
    let runner = Arc::new(CheckRunner::new(
        Arc::clone(&catalog),
        executor,
        Arc::clone(&alerts),
        Arc::clone(&sink) as Arc<dyn CheckSink>,
        Arc::new(Notifier::default()),
        Arc::clone(&settings),
    ));

    Arc::new(AppState {
        settings,
        registry,
        catalog,
        alerts,
        sink,
        runner,
        next_connection_id: AtomicI64::new(1),
    })
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Replica connections
        .route("/connections", get(list_connections))
        .route("/connections", post(register_connection))
        .route("/connections/:id", delete(remove_connection))
        // Monitored tables
        .route("/tables", get(list_tables))
        .route("/tables", post(register_table))
        .route("/tables/:id", delete(remove_table))
        .route("/tables/:id/run", post(run_cycle))
        .route("/tables/:id/suppress", post(suppress_table))
        .route("/tables/:id/suppress", delete(unsuppress_table))
        // Results and alerts
        .route("/checks", get(recent_checks))
        .route("/alerts", get(open_alerts))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server with the background scheduler
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_state(config.settings.clone(), Arc::new(PgSessionFactory));

    let mut scheduler = CheckScheduler::new(
        Arc::clone(&state.catalog),
        Arc::clone(&state.runner),
        Duration::from_secs(config.scheduler_tick_secs),
    );
    let scheduler_handle = scheduler.start();

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting repliwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    scheduler_handle.abort();
    tracing::info!("repliwatch server stopped");
    Ok(())
}

async fn shutdown_signal(mut scheduler: CheckScheduler) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to install CTRL+C signal handler");
        return;
    }

    tracing::info!("Shutdown signal received, stopping scheduler...");
    scheduler.stop().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    use crate::model::TableRef;
    use crate::replica::mock::{MockReplica, MockTable};

    fn test_state() -> (Arc<AppState>, MockReplica) {
        let mock = MockReplica::new();
        let state = build_state(Settings::default(), Arc::new(mock.clone()));
        (state, mock)
    }

    async fn json_request(
        app: Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (state, _mock) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_connection_and_table() {
        let (state, _mock) = test_state();
        let app = build_router(state);

        let (status, connection) = json_request(
            app.clone(),
            "POST",
            "/connections",
            serde_json::json!({
                "name": "acme-replica",
                "connection_string": "host=replica user=monitor",
                "max_queries_per_minute": 30
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(connection["max_queries_per_minute"], 30);
        let connection_id = connection["id"].as_i64().unwrap();

        let (status, table) = json_request(
            app,
            "POST",
            "/tables",
            serde_json::json!({
                "connection_id": connection_id,
                "schema": "public",
                "table": "orders",
                "monitors": ["volume", "schema"]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(table["interval_minutes"], 5);
    }

    #[tokio::test]
    async fn test_register_freshness_table_requires_time_column() {
        let (state, _mock) = test_state();
        let app = build_router(state.clone());

        let (status, _) = json_request(
            app.clone(),
            "POST",
            "/connections",
            serde_json::json!({
                "name": "acme",
                "connection_string": "host=replica"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = json_request(
            app,
            "POST",
            "/tables",
            serde_json::json!({
                "connection_id": 1,
                "schema": "public",
                "table": "orders",
                "monitors": ["freshness"]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("time_column"));
    }

    #[tokio::test]
    async fn test_run_cycle_end_to_end() {
        let (state, mock) = test_state();
        let app = build_router(state);
        mock.set_table(
            TableRef::new("public", "orders"),
            MockTable {
                row_count: 120,
                ..Default::default()
            },
        );

        let (status, _) = json_request(
            app.clone(),
            "POST",
            "/connections",
            serde_json::json!({
                "name": "acme",
                "connection_string": "host=replica"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, table) = json_request(
            app.clone(),
            "POST",
            "/tables",
            serde_json::json!({
                "connection_id": 1,
                "schema": "public",
                "table": "orders",
                "monitors": ["volume"]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let table_id = table["id"].as_i64().unwrap();

        let (status, summary) = json_request(
            app.clone(),
            "POST",
            &format!("/tables/{}/run", table_id),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["status"], "healthy");
        assert_eq!(summary["results"][0]["status"], "success");

        // The result landed in the sink
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/checks?table_id={}", table_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let checks: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(checks.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_cycle_unknown_table_is_404() {
        let (state, _mock) = test_state();
        let app = build_router(state);

        let (status, _) = json_request(app, "POST", "/tables/42/run", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remove_connection_not_found() {
        let (state, _mock) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/connections/9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_suppress_and_unsuppress() {
        let (state, _mock) = test_state();
        let app = build_router(state.clone());

        json_request(
            app.clone(),
            "POST",
            "/connections",
            serde_json::json!({"name": "acme", "connection_string": "host=replica"}),
        )
        .await;
        let (_, table) = json_request(
            app.clone(),
            "POST",
            "/tables",
            serde_json::json!({
                "connection_id": 1,
                "schema": "public",
                "table": "orders",
                "monitors": ["volume"]
            }),
        )
        .await;
        let table_id = table["id"].as_i64().unwrap();

        let (status, _) = json_request(
            app.clone(),
            "POST",
            &format!("/tables/{}/suppress", table_id),
            serde_json::json!({"reason": "planned maintenance"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.alerts.suppression_reason(table_id).is_some());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/tables/{}/suppress", table_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.alerts.suppression_reason(table_id).is_none());
    }
}
