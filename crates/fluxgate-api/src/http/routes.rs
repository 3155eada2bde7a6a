//! HTTP route definitions and handlers.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, warn};

use fluxgate_server::{ConnectionStatus, QueryServiceError};
use fluxgate_storage::{DataPoint, StorageError};

use super::state::AppState;
use crate::observability::{metrics_handler, MetricsState};

/// Default request body size limit (1MB).
///
/// Every route is a GET, so anything larger than this is rejected early.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Path prefix shared by the query routes.
pub const API_PREFIX: &str = "/api/influxdb_query_api";

/// Range start used when the `start` query parameter is absent.
pub const DEFAULT_RANGE_START: &str = "-1h";

/// Range stop used when the `end` query parameter is absent.
pub const DEFAULT_RANGE_STOP: &str = "now()";

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("{API_PREFIX}/query/:entity_id"), get(query_entity))
        .route(&format!("{API_PREFIX}/status"), get(connection_status))
        .route("/ready", get(readiness_check))
}

/// Creates the HTTP router with the query endpoints and health checks.
///
/// Applies the default body size limit (1MB).
pub fn create_router(state: AppState) -> Router {
    create_router_with_body_limit(state, DEFAULT_BODY_LIMIT)
}

/// Creates the HTTP router with a custom body size limit.
pub fn create_router_with_body_limit(state: AppState, body_limit: usize) -> Router {
    api_routes()
        .route("/health", get(health_check))
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// Creates the HTTP router with observability endpoints.
///
/// This includes the query endpoints plus:
/// - `/metrics` - Prometheus metrics endpoint
/// - `/health` - Basic health check
/// - `/ready` - Readiness check (initializes the pool on first call)
pub fn create_router_with_observability(state: AppState, metrics_state: MetricsState) -> Router {
    create_router_with_observability_and_limit(state, metrics_state, DEFAULT_BODY_LIMIT)
}

/// Creates the HTTP router with observability endpoints and custom body size limit.
pub fn create_router_with_observability_and_limit(
    state: AppState,
    metrics_state: MetricsState,
    body_limit: usize,
) -> Router {
    let api_router = api_routes()
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(body_limit));

    let observability_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check))
        .with_state(metrics_state);

    api_router.merge(observability_router)
}

// ============================================================
// Error Handling
// ============================================================

/// Error codes carried in the `code` field of an error body.
///
/// Each code maps to one HTTP status in [`ApiError::into_response`]:
///
/// - [`VALIDATION_ERROR`] - 400, rejected input (including injection detection)
/// - [`QUERY_FAILED`] - 502, the time-series backend failed
/// - [`INTERNAL_ERROR`] - 500, anything else
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const QUERY_FAILED: &str = "query_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error (400).
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::VALIDATION_ERROR, message)
    }

    /// Creates a backend query failure (502).
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::new(error_codes::QUERY_FAILED, message)
    }

    /// Creates an internal error (500).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use error_codes::*;

        let status = match self.code.as_str() {
            VALIDATION_ERROR => StatusCode::BAD_REQUEST,
            QUERY_FAILED => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<QueryServiceError> for ApiError {
    fn from(err: QueryServiceError) -> Self {
        match err {
            // The validation message names the offending field or pattern.
            QueryServiceError::ValidationFailed(err) => {
                warn!(error = %err, "query rejected");
                ApiError::validation_error(err.to_string())
            }
            QueryServiceError::QueryExecutionFailed(err) => {
                // Full backend detail goes to the log only
                error!(error = %err, "query execution failed");
                match err {
                    StorageError::QueryFailed { attempts, .. } => ApiError::query_failed(format!(
                        "query execution failed after {attempts} attempt(s)"
                    )),
                    StorageError::ConnectionError { .. } => {
                        ApiError::query_failed("time-series backend unavailable")
                    }
                    StorageError::Unexpected { .. } => {
                        ApiError::internal_error("internal error while executing query")
                    }
                }
            }
        }
    }
}

// Malformed paths and query strings get the same body as other rejected input.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        warn!(error = %rejection, "invalid path parameters");
        ApiError::validation_error(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        warn!(error = %rejection, "invalid query string");
        ApiError::validation_error(rejection.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================
// Health and Readiness Checks
// ============================================================

/// Liveness probe. Does not touch the backend.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness probe.
///
/// Initializes the pool if this is the first use, then reports ready when at
/// least one live connection exists. Connection errors are logged by the pool
/// and never exposed here.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.ensure_ready().await;

    let live = match state.service.connection_status() {
        ConnectionStatus::Initialized(status) => status.idle_count + status.checked_out_count,
        ConnectionStatus::NotInitialized => 0,
    };

    if live > 0 {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "checks": { "influxdb": "ok" }
            })),
        )
    } else {
        error!("Readiness check failed: no live time-series connections");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "checks": { "influxdb": "unavailable" }
            })),
        )
    }
}

// ============================================================
// Query Endpoints
// ============================================================

/// Query parameters for the entity history endpoint.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(default = "default_range_start")]
    pub start: String,
    #[serde(default = "default_range_stop")]
    pub end: String,
}

fn default_range_start() -> String {
    DEFAULT_RANGE_START.to_string()
}

fn default_range_stop() -> String {
    DEFAULT_RANGE_STOP.to_string()
}

/// `GET /api/influxdb_query_api/query/:entity_id`
async fn query_entity(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    range: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DataPoint>>> {
    let Path(entity_id) = path?;
    let Query(range) = range?;
    let points = state
        .service
        .run_query(&entity_id, &range.start, &range.end)
        .await?;
    Ok(Json(points))
}

/// `GET /api/influxdb_query_api/status`
async fn connection_status(State(state): State<Arc<AppState>>) -> Json<ConnectionStatus> {
    Json(state.service.connection_status())
}
