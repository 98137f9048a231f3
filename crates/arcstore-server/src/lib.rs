//! HTTP service exposing measurement records backed by the pooled SQLite
//! store.
//!
//! Every record endpoint leases exactly one connection through
//! [`AppState::with_records`], which returns it to the pool before the
//! response is written.

pub mod api_files;
pub mod api_status;
pub mod config;
pub mod error;
pub mod middleware;

use arcstore_db::{DbPool, PoolPhase};
use arcstore_records::RecordError;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use middleware::RateLimiter;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Largest accepted request body. Requests only carry small JSON documents.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Directory that stored `binary_data_path` values are relative to.
    pub binary_dir: PathBuf,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Requests allowed per client IP per minute.
    pub rate_limit: u32,
}

impl AppState {
    /// Runs `work` against one leased connection on the blocking pool.
    ///
    /// # Errors
    ///
    /// Pool exhaustion and shutdown surface as `ApiError::Busy` and
    /// `ApiError::Unavailable`; record errors are mapped by kind.
    pub async fn with_records<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Connection) -> Result<T, RecordError> + Send + 'static,
        T: Send + 'static,
    {
        self.pool
            .with_connection(None, move |conn| work(conn))
            .await
            .map_err(ApiError::from)
    }
}

/// Health check handler.
///
/// Reports pool occupancy. Returns `503` once the pool stopped accepting
/// acquisitions so load balancers take the instance out of rotation.
async fn health(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let pool = state.pool.stats();
    let (code, status) = match pool.phase {
        PoolPhase::Running if pool.is_saturated() => (StatusCode::OK, "saturated"),
        PoolPhase::Running => (StatusCode::OK, "healthy"),
        PoolPhase::Draining | PoolPhase::Closed => (StatusCode::SERVICE_UNAVAILABLE, "closed"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": "database",
            "version": env!("CARGO_PKG_VERSION"),
            "pool": pool,
        })),
    )
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": "arcstore",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "files": "GET /api/files?label=",
            "file": "GET /api/files/{id}",
            "file_data": "GET /api/files/{id}/data",
            "update_label": "PUT /api/files/{id}/label",
            "update_transients": "PUT /api/files/{id}/transients",
            "file_status": "GET|PUT /api/files/{id}/status",
            "reject": "POST /api/files/{id}/reject",
            "experiments": "GET /api/experiments?status=&manual_reviewed=",
            "rejections": "GET /api/rejections",
            "search": "GET /api/search?filename=&voltage_min=&voltage_max=&current_min=&current_max=",
            "labels": "GET /api/labels",
            "label_statistics": "GET /api/labels/statistics",
            "status_summary": "GET /api/status",
        },
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/files", get(api_files::list_files_handler))
        .route("/api/files/{id}", get(api_files::get_file_handler))
        .route("/api/files/{id}/data", get(api_files::get_file_data_handler))
        .route("/api/files/{id}/label", put(api_files::update_label_handler))
        .route(
            "/api/files/{id}/transients",
            put(api_files::update_transients_handler),
        )
        .route(
            "/api/files/{id}/status",
            get(api_status::get_status_handler).put(api_status::set_status_handler),
        )
        .route("/api/files/{id}/reject", post(api_status::reject_handler))
        .route("/api/experiments", get(api_status::list_experiments_handler))
        .route("/api/rejections", get(api_status::list_rejections_handler))
        .route("/api/status", get(api_status::status_summary_handler))
        .route("/api/search", get(api_files::search_handler))
        .route("/api/labels", get(api_files::list_labels_handler))
        .route(
            "/api/labels/statistics",
            get(api_files::label_statistics_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
