//! API Routes
//!
//! Configures the Axum router with all admin endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    cleanup_handler, clear_all_handler, clear_handler, health_handler, health_score_handler,
    list_types_handler, report_handler, reset_metrics_handler, stats_handler, update_type_handler,
    AppState,
};

/// Creates the admin router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Store reachability and health grade
/// - `GET /stats` - Counters, store INFO and event bus stats
/// - `GET /metrics/report` - Full performance report
/// - `GET /metrics/health-score` - Health score only
/// - `POST /metrics/reset` - Reset counters
/// - `POST /cache/clear` - Clear by tags, patterns or types
/// - `POST /cache/clear-all` - Clear every key (requires confirmation)
/// - `POST /cache/cleanup` - Run a cleanup cycle now
/// - `GET /types` - List cache types
/// - `PUT /types/:cache_type` - Patch or create a cache type
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics/report", get(report_handler))
        .route("/metrics/health-score", get(health_score_handler))
        .route("/metrics/reset", post(reset_metrics_handler))
        .route("/cache/clear", post(clear_handler))
        .route("/cache/clear-all", post(clear_all_handler))
        .route("/cache/cleanup", post(cleanup_handler))
        .route("/types", get(list_types_handler))
        .route("/types/:cache_type", put(update_type_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
