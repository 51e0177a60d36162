//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::admin::{CacheAdmin, HealthStatus, ServiceStatus, StatsReport};
use crate::cache::{
    CacheAside, CacheEngine, CacheTypeConfig, EventBus, StampedeGuard, TypeOverride, TypeRegistry,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::metrics::{HealthScore, MetricsAggregator, PerformanceReport};
use crate::models::{ClearAllRequest, ClearRequest, ClearResponse, ResetResponse, TypesResponse};
use crate::store::KvStore;
use crate::tasks::{CleanupReport, CleanupScheduler};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub admin: Arc<CacheAdmin>,
    /// Read-through entry point for application code
    pub aside: CacheAside,
}

impl AppState {
    /// Wires registry, event bus, engine, metrics and cleanup over `store`.
    ///
    /// Background tasks are not started; see
    /// [`MetricsAggregator::spawn`] and [`CleanupScheduler::spawn`].
    pub fn build(store: Arc<dyn KvStore>, config: &Config) -> Result<Self> {
        let registry = Arc::new(TypeRegistry::from_config(config)?);
        let events = Arc::new(EventBus::new(config.monitoring.event_buffer));
        let engine = Arc::new(CacheEngine::new(
            store.clone(),
            registry,
            events.clone(),
            &config.cache,
        ));
        let metrics = Arc::new(MetricsAggregator::new(config.monitoring.clone(), events));
        let cleanup = Arc::new(CleanupScheduler::new(engine.clone(), config.cleanup.clone()));
        let guard = StampedeGuard::from_config(store, &config.cache);

        Ok(Self {
            aside: CacheAside::new(engine.clone(), guard),
            admin: Arc::new(CacheAdmin::new(engine, metrics, cleanup, config)),
        })
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        self.admin.engine()
    }
}

/// Handler for GET /health
///
/// 503 when the store is unreachable.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let health = state.admin.get_health_status().await;
    let code = match health.status {
        ServiceStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(health))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsReport> {
    Json(state.admin.get_stats().await)
}

/// Handler for GET /metrics/report
pub async fn report_handler(State(state): State<AppState>) -> Json<PerformanceReport> {
    Json(state.admin.get_performance_report())
}

/// Handler for GET /metrics/health-score
pub async fn health_score_handler(State(state): State<AppState>) -> Json<HealthScore> {
    Json(state.admin.get_health_score())
}

/// Handler for POST /metrics/reset
pub async fn reset_metrics_handler(State(state): State<AppState>) -> Json<ResetResponse> {
    state.admin.reset_metrics();
    Json(ResetResponse::now())
}

/// Handler for POST /cache/clear
pub async fn clear_handler(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<ClearResponse>> {
    let removed = state.admin.clear(&req).await?;
    Ok(Json(ClearResponse::new(removed)))
}

/// Handler for POST /cache/clear-all
///
/// Requires `{"confirm": true}`.
pub async fn clear_all_handler(
    State(state): State<AppState>,
    Json(req): Json<ClearAllRequest>,
) -> Result<Json<ClearResponse>> {
    if !req.confirm {
        return Err(CacheError::InvalidRequest(
            "Clearing every key requires \"confirm\": true".to_string(),
        ));
    }
    let removed = state.admin.clear_all().await?;
    Ok(Json(ClearResponse::new(removed)))
}

/// Handler for POST /cache/cleanup
pub async fn cleanup_handler(State(state): State<AppState>) -> Result<Json<CleanupReport>> {
    Ok(Json(state.admin.perform_manual_cleanup().await?))
}

/// Handler for GET /types
pub async fn list_types_handler(State(state): State<AppState>) -> Json<TypesResponse> {
    Json(TypesResponse::new(state.admin.list_types()))
}

/// Handler for PUT /types/:cache_type
///
/// The path names the type; a `type` field in the body, if any, must agree.
pub async fn update_type_handler(
    State(state): State<AppState>,
    Path(cache_type): Path<String>,
    Json(mut patch): Json<TypeOverride>,
) -> Result<Json<CacheTypeConfig>> {
    if !patch.cache_type.is_empty() && patch.cache_type != cache_type {
        return Err(CacheError::InvalidRequest(format!(
            "Body type '{}' does not match path type '{}'",
            patch.cache_type, cache_type
        )));
    }
    patch.cache_type = cache_type;
    Ok(Json(state.admin.update_type(&patch)?))
}
