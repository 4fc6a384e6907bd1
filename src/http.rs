//! HTTP API for the metrics query service
//!
//! # Endpoints
//!
//! - `POST /api/v1/metrics` - Batch: JSON array of metrics URIs in, envelopes out
//! - `GET /api/v1/metrics/<path>?<query>` - A single metrics URI
//! - `GET /health` - Health status
//! - `GET /metrics` - Prometheus metrics
//!
//! Failures answer with `{"error": "..."}` and the status class of the
//! underlying [`Error`]: 415 for a non-JSON batch body, 400 for a malformed
//! envelope or URI, 503 when the metrics store is unavailable.

use crate::batch::BatchMetricsHandler;
use crate::config::Config;
use crate::error::Error;
use crate::metrics::gather_metrics;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Route prefix of the metrics API
pub const METRICS_API_PREFIX: &str = "/api/v1/metrics";

// =============================================================================
// Application State
// =============================================================================

/// Shared state of the HTTP handlers
pub struct AppState {
    /// Batch handler, which also owns the parser and the engine
    pub handler: Arc<BatchMetricsHandler>,
    /// Service configuration
    pub config: Config,
}

impl AppState {
    /// Create handler state
    pub fn new(handler: Arc<BatchMetricsHandler>, config: Config) -> Self {
        Self { handler, config }
    }
}

/// Error body returned for failed calls
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Failure message
    pub error: String,
}

/// Health check body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Number of time-series tables built so far
    pub tables_loaded: usize,
}

/// [`Error`] rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_hint())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build CORS layer from configured origins (empty allows any origin)
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if cors_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Metrics API
        .route(METRICS_API_PREFIX, post(batch_query))
        .route(&format!("{}/*path", METRICS_API_PREFIX), get(single_query))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config.server.cors_allowed_origins))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tables_loaded: state.handler.engine().table_cache().loaded_count(),
    })
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    if !state.config.monitoring.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
        .into_response()
}

/// Batch endpoint: one envelope per submitted URI, in order
async fn batch_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let results = state.handler.handle_request(content_type, &body).await?;
    Ok((StatusCode::OK, Json(results)).into_response())
}

/// Single-query endpoint: the request path below the API prefix is the metrics URI
async fn single_query(State(state): State<Arc<AppState>>, uri: Uri) -> Result<Response, ApiError> {
    let path = uri
        .path()
        .strip_prefix(METRICS_API_PREFIX)
        .unwrap_or_default()
        .trim_start_matches('/');
    let metrics_uri = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    debug!(uri = %metrics_uri, "Single metrics query");

    let output = state.handler.query(&metrics_uri).await?;
    Ok((StatusCode::OK, Json(output)).into_response())
}
