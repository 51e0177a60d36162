//! Cache Admin Module
//!
//! Administrative facade over the engine, metrics and cleanup scheduler.
//! Destructive operations only run on an explicit typed request and return
//! store failures to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::cache::{BusStats, CacheEngine, CacheTypeConfig, TypeOverride};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::metrics::{HealthGrade, HealthScore, MetricsAggregator, MetricsSnapshot, PerformanceReport};
use crate::models::ClearRequest;
use crate::store::StoreInfo;
use crate::tasks::{CleanupReport, CleanupScheduler};

/// Overall service condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: ServiceStatus,
    /// Backend name, `redis` or `memory`
    pub store: &'static str,
    pub store_reachable: bool,
    pub store_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_pressure: Option<f64>,
    pub health: HealthScore,
    pub cleanup_running: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub snapshot: MetricsSnapshot,
    pub per_type: std::collections::BTreeMap<String, MetricsSnapshot>,
    /// `None` when the store could not be queried
    pub store: Option<StoreInfo>,
    /// Server-side hit rate from the store's keyspace counters
    pub store_hit_rate: Option<f64>,
    pub events: BusStats,
    pub registered_types: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    #[serde(rename = "type")]
    pub cache_type: String,
    pub loaded: usize,
    pub written: usize,
    pub duration_ms: u64,
}

// == Cache Admin ==
#[derive(Debug)]
pub struct CacheAdmin {
    engine: Arc<CacheEngine>,
    metrics: Arc<MetricsAggregator>,
    cleanup: Arc<CleanupScheduler>,
    default_ttl_secs: u64,
    critical_pressure: f64,
    started: Instant,
}

impl CacheAdmin {
    pub fn new(
        engine: Arc<CacheEngine>,
        metrics: Arc<MetricsAggregator>,
        cleanup: Arc<CleanupScheduler>,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            metrics,
            cleanup,
            default_ttl_secs: config.cache.default_ttl_secs,
            critical_pressure: config.cleanup.critical_threshold,
            started: Instant::now(),
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.cleanup
    }

    async fn store_info(&self) -> Option<StoreInfo> {
        match self.engine.store().info("all").await {
            Ok(text) => Some(StoreInfo::parse(&text)),
            Err(e) => {
                error!(error = %e, "Failed to read store INFO");
                None
            }
        }
    }

    pub async fn get_stats(&self) -> StatsReport {
        let store = self.store_info().await;
        StatsReport {
            snapshot: self.metrics.snapshot(),
            per_type: self.metrics.type_snapshots(),
            store_hit_rate: store.as_ref().map(StoreInfo::keyspace_hit_rate),
            store,
            events: self.engine.events().stats(),
            registered_types: self.engine.registry().len(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Unhealthy when the store does not answer; degraded under critical
    /// memory pressure or a poor health grade once traffic has been seen.
    pub async fn get_health_status(&self) -> HealthStatus {
        let store = self.engine.store();
        let started = Instant::now();
        let reachable = store.ping().await.is_ok();
        let store_latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let memory_pressure = if reachable {
            self.store_info().await.map(|info| info.memory_pressure())
        } else {
            None
        };
        let health = self.metrics.health();
        let seen_reads = self.metrics.snapshot().lookups() > 0;

        let status = if !reachable {
            ServiceStatus::Unhealthy
        } else if memory_pressure.is_some_and(|p| p >= self.critical_pressure)
            || (seen_reads && health.grade == HealthGrade::Poor)
        {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Healthy
        };

        HealthStatus {
            status,
            store: store.name(),
            store_reachable: reachable,
            store_latency_ms,
            memory_pressure,
            health,
            cleanup_running: self.cleanup.is_running(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Clears every tag, pattern and type in `request`. Patterns are relative
    /// to the global prefix.
    pub async fn clear(&self, request: &ClearRequest) -> Result<u64> {
        if let Some(msg) = request.validate() {
            return Err(CacheError::InvalidRequest(msg));
        }

        let mut removed = 0;
        if !request.tags.is_empty() {
            removed += self.engine.clear_by_tags(&request.tags).await.map_err(|e| {
                error!(tags = ?request.tags, error = %e, "Clear by tags failed");
                e
            })?;
        }
        for pattern in &request.patterns {
            let scoped = self.engine.keys().scoped_pattern(pattern);
            removed += self.engine.clear_by_pattern(&scoped).await.map_err(|e| {
                error!(pattern = %scoped, error = %e, "Clear by pattern failed");
                e
            })?;
        }
        for cache_type in &request.types {
            removed += self.engine.clear_type(cache_type).await?;
        }

        info!(
            tags = ?request.tags,
            patterns = ?request.patterns,
            types = ?request.types,
            removed = removed,
            "Admin clear"
        );
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.engine.clear_all().await.map_err(|e| {
            error!(error = %e, "Clear all failed");
            e
        })?;
        info!(removed = removed, "Admin cleared all cache keys");
        Ok(removed)
    }

    /// Loads entries for `cache_type` and writes each one.
    pub async fn warmup<T, F, Fut>(&self, cache_type: &str, loader: F) -> Result<WarmupReport>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<(String, T)>>>,
    {
        self.engine.registry().require(cache_type)?;
        let started = Instant::now();

        let entries = loader().await?;
        let mut written = 0;
        for (key, value) in &entries {
            if self.engine.try_set(key, value, cache_type, None).await? {
                written += 1;
            }
        }

        let report = WarmupReport {
            cache_type: cache_type.to_string(),
            loaded: entries.len(),
            written,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            cache_type = cache_type,
            loaded = report.loaded,
            written = report.written,
            "Cache warmup finished"
        );
        Ok(report)
    }

    pub async fn perform_manual_cleanup(&self) -> Result<CleanupReport> {
        info!("Manual cleanup requested");
        self.cleanup.run_cycle().await
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        self.metrics.report()
    }

    pub fn get_health_score(&self) -> HealthScore {
        self.metrics.health()
    }

    pub fn list_types(&self) -> Vec<CacheTypeConfig> {
        self.engine
            .registry()
            .all()
            .into_iter()
            .map(|config| config.as_ref().clone())
            .collect()
    }

    /// Validates and applies a patch to one type.
    pub fn update_type(&self, patch: &TypeOverride) -> Result<CacheTypeConfig> {
        let updated = self
            .engine
            .registry()
            .apply_override(patch, self.default_ttl_secs)?;
        info!(cache_type = %updated.cache_type, "Cache type updated");
        Ok(updated.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EventBus, TypeRegistry};
    use crate::store::{KvStore, MemoryStore};
    use std::time::Duration;

    fn admin(store: Arc<MemoryStore>) -> CacheAdmin {
        let config = Config::default();
        let bus = Arc::new(EventBus::new(128));
        let engine = Arc::new(CacheEngine::new(
            store,
            Arc::new(TypeRegistry::with_defaults()),
            bus.clone(),
            &config.cache,
        ));
        let metrics = Arc::new(MetricsAggregator::new(config.monitoring.clone(), bus));
        let cleanup = Arc::new(CleanupScheduler::new(engine.clone(), config.cleanup.clone()));
        CacheAdmin::new(engine, metrics, cleanup, &config)
    }

    #[tokio::test]
    async fn test_clear_mixes_tags_patterns_and_types() {
        let store = Arc::new(MemoryStore::default());
        let admin = admin(store.clone());
        let engine = admin.engine();
        engine.set("1", &1, "search", None).await;
        engine.set("1", &1, "session", None).await;
        engine.set("1", &1, "stats", None).await;
        engine.set("1", &1, "user", None).await;

        let request = ClearRequest {
            tags: vec!["search".to_string()],
            patterns: vec!["session:*".to_string()],
            types: vec!["stats".to_string()],
        };
        assert_eq!(admin.clear(&request).await.unwrap(), 3);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_rejects_empty_request() {
        let admin = admin(Arc::new(MemoryStore::default()));
        let result = admin.clear(&ClearRequest::default()).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_destructive_operations_propagate_store_errors() {
        let store = Arc::new(MemoryStore::default());
        let admin = admin(store.clone());
        store.set_available(false);

        assert!(admin.clear_all().await.is_err());
        let request = ClearRequest {
            tags: vec!["content".to_string()],
            ..ClearRequest::default()
        };
        assert!(admin.clear(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_warmup_writes_loaded_entries() {
        let store = Arc::new(MemoryStore::default());
        let admin = admin(store.clone());

        let report = admin
            .warmup("tag", || async {
                Ok(vec![
                    ("rust".to_string(), "Rust".to_string()),
                    ("go".to_string(), "Go".to_string()),
                ])
            })
            .await
            .unwrap();

        assert_eq!(report.loaded, 2);
        assert_eq!(report.written, 2);
        assert!(store.get("blog:tag:rust").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_warmup_unknown_type() {
        let admin = admin(Arc::new(MemoryStore::default()));
        let result = admin
            .warmup("nope", || async { Ok(Vec::<(String, u32)>::new()) })
            .await;
        assert!(matches!(result, Err(CacheError::UnknownType(_))));
    }

    #[tokio::test]
    async fn test_health_status() {
        let store = Arc::new(MemoryStore::new(1000));
        let admin = admin(store.clone());

        let healthy = admin.get_health_status().await;
        assert_eq!(healthy.status, ServiceStatus::Healthy);
        assert!(healthy.store_reachable);

        store.simulate_used_memory(Some(950));
        assert_eq!(admin.get_health_status().await.status, ServiceStatus::Degraded);

        store.set_available(false);
        let down = admin.get_health_status().await;
        assert_eq!(down.status, ServiceStatus::Unhealthy);
        assert!(down.memory_pressure.is_none());
    }

    #[tokio::test]
    async fn test_update_type_validates() {
        let admin = admin(Arc::new(MemoryStore::default()));

        let patch = TypeOverride {
            cache_type: "article".to_string(),
            ttl: Some(120),
            ..TypeOverride::default()
        };
        let updated = admin.update_type(&patch).unwrap();
        assert_eq!(updated.default_ttl_secs, 120);
        assert!(updated.tags.contains("content"));

        let bad = TypeOverride {
            cache_type: "article".to_string(),
            ttl: Some(10 * 604_800),
            ..TypeOverride::default()
        };
        assert!(matches!(
            admin.update_type(&bad),
            Err(CacheError::ConfigurationInvalid(_))
        ));
        assert_eq!(admin.engine().registry().get("article").unwrap().default_ttl_secs, 120);
    }

    #[tokio::test]
    async fn test_manual_cleanup_and_stats() {
        let store = Arc::new(MemoryStore::new(1000));
        let admin = admin(store.clone());
        store
            .set("blog:article:1", b"1", Duration::from_secs(10))
            .await
            .unwrap();
        store
            .set("blog:article:2", b"1", Duration::from_secs(600))
            .await
            .unwrap();
        store.simulate_used_memory(Some(850));

        let report = admin.perform_manual_cleanup().await.unwrap();
        assert_eq!(report.keys_removed, 1);

        let stats = admin.get_stats().await;
        assert_eq!(stats.registered_types, 8);
        assert_eq!(stats.store.unwrap().max_memory, 1000);
        assert_eq!(admin.list_types().len(), 8);
    }
}
