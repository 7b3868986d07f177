use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, AlertLifecycleManager};
use crate::catalog::TableCatalog;
use crate::check::{CheckRunner, CycleError, CycleSummary};
use crate::config::Settings;
use crate::guardrail::GuardrailLimits;
use crate::model::{MonitorType, MonitoredTable, TableRef};
use crate::replica::ReplicaRegistry;
use crate::sink::{MemorySink, RecordedCheck};

/// Application state shared across handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ReplicaRegistry>,
    pub catalog: Arc<TableCatalog>,
    pub alerts: Arc<AlertLifecycleManager>,
    pub sink: Arc<MemorySink>,
    pub runner: Arc<CheckRunner>,
    pub next_connection_id: AtomicI64,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tables: usize,
    pub open_alerts: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        tables: state.catalog.len(),
        open_alerts: state.alerts.open_alerts().len(),
    })
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterConnectionRequest {
    pub name: String,
    pub connection_string: String,
    #[serde(default)]
    pub max_queries_per_minute: Option<usize>,
    #[serde(default)]
    pub max_concurrent_queries: Option<usize>,
    #[serde(default)]
    pub query_timeout_seconds: Option<u64>,
}

#[derive(Serialize)]
pub struct ConnectionResponse {
    pub id: i64,
    pub name: String,
    pub max_queries_per_minute: usize,
    pub max_concurrent_queries: usize,
    pub query_timeout_seconds: u64,
}

impl ConnectionResponse {
    fn from_parts(id: i64, name: String, limits: &GuardrailLimits) -> Self {
        Self {
            id,
            name,
            max_queries_per_minute: limits.max_queries_per_minute,
            max_concurrent_queries: limits.max_concurrent_queries,
            query_timeout_seconds: limits.query_timeout.as_secs(),
        }
    }
}

pub async fn register_connection(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterConnectionRequest>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    if request.connection_string.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "connection_string must not be empty".to_string(),
        ));
    }

    let defaults = &state.settings.default_guardrails;
    let limits = GuardrailLimits {
        max_queries_per_minute: request
            .max_queries_per_minute
            .unwrap_or(defaults.max_queries_per_minute),
        max_concurrent_queries: request
            .max_concurrent_queries
            .unwrap_or(defaults.max_concurrent_queries),
        query_timeout: request
            .query_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(defaults.query_timeout),
    };

    let id = state.next_connection_id.fetch_add(1, Ordering::SeqCst);
    state
        .registry
        .register(id, &request.name, &request.connection_string, limits.clone());

    Ok(Json(ConnectionResponse::from_parts(
        id,
        request.name,
        &limits,
    )))
}

pub async fn list_connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionResponse>> {
    let mut connections: Vec<ConnectionResponse> = state
        .registry
        .list()
        .into_iter()
        .map(|c| ConnectionResponse::from_parts(c.id, c.name.clone(), &c.limits))
        .collect();
    connections.sort_by_key(|c| c.id);
    Json(connections)
}

pub async fn remove_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.registry.remove(id) {
        return Err(ApiError::NotFound(format!("Connection {} not found", id)));
    }
    Ok(Json(serde_json::json!({ "removed": id })))
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterTableRequest {
    pub connection_id: i64,
    pub schema: String,
    pub table: String,
    pub monitors: Vec<MonitorType>,
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
}

pub async fn register_table(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterTableRequest>,
) -> Result<Json<MonitoredTable>, ApiError> {
    if request.monitors.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one monitor type is required".to_string(),
        ));
    }
    if request.monitors.contains(&MonitorType::Freshness) && request.time_column.is_none() {
        return Err(ApiError::BadRequest(
            "time_column is required for freshness monitoring".to_string(),
        ));
    }
    if state.registry.get(request.connection_id).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Connection {} is not registered",
            request.connection_id
        )));
    }

    let table = state.catalog.create(
        request.connection_id,
        TableRef::new(request.schema, request.table),
        request.monitors,
        request.time_column,
        request.interval_minutes.unwrap_or(5),
    );

    Ok(Json(table))
}

pub async fn list_tables(State(state): State<Arc<AppState>>) -> Json<Vec<MonitoredTable>> {
    Json(state.catalog.list())
}

pub async fn remove_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.catalog.remove(id) {
        return Err(ApiError::NotFound(format!("Table {} not found", id)));
    }
    state.alerts.forget_table(id);
    Ok(Json(serde_json::json!({ "removed": id })))
}

// ============================================================================
// Checks
// ============================================================================

pub async fn run_cycle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<CycleSummary>, ApiError> {
    let summary = state.runner.run_check_cycle(id).await.map_err(|e| match e {
        CycleError::TableNotFound(_) => ApiError::NotFound(e.to_string()),
        CycleError::Contract(_) => ApiError::BadRequest(e.to_string()),
    })?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct ChecksQuery {
    #[serde(default)]
    pub table_id: Option<i64>,
}

pub async fn recent_checks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChecksQuery>,
) -> Json<Vec<RecordedCheck>> {
    Json(state.sink.recent_checks(query.table_id))
}

// ============================================================================
// Alerts
// ============================================================================

pub async fn open_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(state.alerts.open_alerts())
}

#[derive(Deserialize)]
pub struct SuppressRequest {
    pub reason: String,
}

pub async fn suppress_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<SuppressRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.catalog.get(id).is_none() {
        return Err(ApiError::NotFound(format!("Table {} not found", id)));
    }
    state.alerts.suppress(id, request.reason);
    Ok(Json(serde_json::json!({ "suppressed": id })))
}

pub async fn unsuppress_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.catalog.get(id).is_none() {
        return Err(ApiError::NotFound(format!("Table {} not found", id)));
    }
    state.alerts.unsuppress(id);
    Ok(Json(serde_json::json!({ "unsuppressed": id })))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
