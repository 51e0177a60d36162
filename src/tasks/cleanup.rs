//! Memory-Pressure Cleanup Task
//!
//! Background task that periodically sheds cache keys when the store runs
//! short of memory.
//!
//! Each cycle reads `used_memory / maxmemory` from the store. Below the
//! configured threshold the cycle is a no-op; above it every enabled type is
//! scanned and the union of these keys is deleted:
//! - keys the store already reports as expired
//! - keys about to expire
//! - the least recently accessed keys over the type's `maxEntries`
//! - under critical pressure, the largest of the remaining big keys
//!
//! Access recency comes from the store's idle time when it has one; keys
//! without it count as accessed just now, so the LRU step is best-effort.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheEngine, CacheTypeConfig, EngineEvent};
use crate::config::CleanupConfig;
use crate::error::Result;
use crate::store::{KeyTtl, StoreInfo};

/// Per-type outcome of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCleanup {
    #[serde(rename = "type")]
    pub cache_type: String,
    pub scanned: usize,
    pub removed: u64,
    /// Store failure that cut this type short; other types still ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one cleanup cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub keys_removed: u64,
    pub duration_ms: u64,
    /// Memory pressure (`used / max`) when the cycle started
    pub memory_usage: f64,
    pub started_at: DateTime<Utc>,
    /// Why the cycle did nothing, if it did nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub types: Vec<TypeCleanup>,
}

impl CleanupReport {
    fn skipped(started_at: DateTime<Utc>, memory_usage: f64, reason: &str) -> Self {
        Self {
            memory_usage,
            started_at,
            skipped: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// What the store reports about one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProbe {
    pub key: String,
    pub ttl: KeyTtl,
    pub size_bytes: u64,
    /// Seconds since last access; 0 when the store cannot tell
    pub idle_secs: u64,
}

/// Picks the keys of one type to delete at the given memory pressure.
pub fn select_evictions(
    probes: &[KeyProbe],
    pressure: f64,
    max_entries: Option<usize>,
    policy: &CleanupConfig,
) -> Vec<String> {
    let mut selected: HashSet<&str> = HashSet::new();

    // Expired but not yet reclaimed
    for probe in probes {
        if probe.ttl == KeyTtl::Expired {
            selected.insert(probe.key.as_str());
        }
    }

    if pressure >= policy.memory_threshold {
        for probe in probes {
            if let KeyTtl::Seconds(secs) = probe.ttl {
                if secs > 0 && secs < policy.expiring_soon_secs {
                    selected.insert(probe.key.as_str());
                }
            }
        }
    }

    if let Some(max) = max_entries {
        let mut live: Vec<&KeyProbe> = probes.iter().filter(|p| p.ttl != KeyTtl::Expired).collect();
        if live.len() > max {
            let excess = live.len() - max;
            live.sort_by(|a, b| b.idle_secs.cmp(&a.idle_secs).then_with(|| a.key.cmp(&b.key)));
            for probe in live.into_iter().take(excess) {
                selected.insert(probe.key.as_str());
            }
        }
    }

    if pressure >= policy.critical_threshold {
        let remaining: Vec<&KeyProbe> = probes
            .iter()
            .filter(|p| !selected.contains(p.key.as_str()))
            .collect();
        let quota = (remaining.len() as f64 * policy.large_key_fraction).floor() as usize;
        let mut large: Vec<&KeyProbe> = remaining
            .into_iter()
            .filter(|p| p.size_bytes > policy.large_key_bytes)
            .collect();
        large.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then_with(|| a.key.cmp(&b.key)));
        for probe in large.into_iter().take(quota) {
            selected.insert(probe.key.as_str());
        }
    }

    let mut keys: Vec<String> = selected.into_iter().map(str::to_string).collect();
    keys.sort();
    keys
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// == Cleanup Scheduler ==
#[derive(Debug)]
pub struct CleanupScheduler {
    engine: Arc<CacheEngine>,
    config: CleanupConfig,
    running: AtomicBool,
}

impl CleanupScheduler {
    pub fn new(engine: Arc<CacheEngine>, config: CleanupConfig) -> Self {
        Self {
            engine,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one cycle now. A cycle already in progress makes this return a
    /// skipped report instead of running a second one.
    pub async fn run_cycle(&self) -> Result<CleanupReport> {
        let started_at = Utc::now();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Cleanup cycle already running, skipping");
            return Ok(CleanupReport::skipped(started_at, 0.0, "cycle already running"));
        }
        let _running = RunningGuard(&self.running);

        let started = Instant::now();
        let store = self.engine.store();
        let info = StoreInfo::parse(&store.info("memory").await?);
        let pressure = info.memory_pressure();

        let mut report = if pressure < self.config.memory_threshold {
            debug!(pressure = pressure, "Memory pressure below threshold, nothing to clean");
            CleanupReport::skipped(started_at, pressure, "memory pressure below threshold")
        } else {
            let mut report = CleanupReport {
                memory_usage: pressure,
                started_at,
                ..CleanupReport::default()
            };
            for config in self.engine.registry().enabled() {
                let outcome = self.clean_type(&config, pressure).await;
                report.keys_removed += outcome.removed;
                report.types.push(outcome);
            }
            report
        };
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.keys_removed > 0 {
            info!(
                removed = report.keys_removed,
                pressure = pressure,
                duration_ms = report.duration_ms,
                "Cleanup cycle removed keys"
            );
        }
        self.engine
            .events()
            .publish(EngineEvent::CleanupCompleted(report.clone()));
        Ok(report)
    }

    /// Cleans one type. A store failure ends this type only and is recorded
    /// in the outcome along with whatever was removed before it.
    async fn clean_type(&self, config: &CacheTypeConfig, pressure: f64) -> TypeCleanup {
        let mut outcome = TypeCleanup {
            cache_type: config.cache_type.clone(),
            ..TypeCleanup::default()
        };
        if let Err(e) = self.sweep_type(config, pressure, &mut outcome).await {
            warn!(
                cache_type = %config.cache_type,
                removed = outcome.removed,
                error = %e,
                "Cleanup of cache type failed"
            );
            outcome.error = Some(e.to_string());
        }
        outcome
    }

    async fn sweep_type(
        &self,
        config: &CacheTypeConfig,
        pressure: f64,
        outcome: &mut TypeCleanup,
    ) -> Result<()> {
        let store = self.engine.store();
        let pattern = self.engine.keys().type_pattern(config);
        let batch = self.config.batch_size.max(1);

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = 0;
        loop {
            let (next, page) = store.scan(cursor, &pattern, batch).await?;
            keys.extend(page.into_iter().filter(|key| seen.insert(key.clone())));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        outcome.scanned = keys.len();
        let mut probes = Vec::with_capacity(keys.len());
        for key in keys {
            let ttl = store.ttl(&key).await?;
            let size_bytes = store.memory_usage(&key).await?.unwrap_or(0);
            let idle_secs = store.idle_time(&key).await?.unwrap_or(0);
            probes.push(KeyProbe {
                key,
                ttl,
                size_bytes,
                idle_secs,
            });
        }

        let doomed = select_evictions(&probes, pressure, config.max_entries, &self.config);
        for chunk in doomed.chunks(batch) {
            outcome.removed += store.del(chunk).await?;
        }

        debug!(
            cache_type = %config.cache_type,
            scanned = outcome.scanned,
            removed = outcome.removed,
            "Cleaned cache type"
        );
        Ok(())
    }

    /// Spawns a background task that runs a cycle every configured interval.
    ///
    /// Firings that land while a cycle is still running are skipped, not
    /// queued. The returned handle is aborted on shutdown.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let period = self.config.interval;

        tokio::spawn(async move {
            info!(
                "Starting cache cleanup task with interval of {} seconds",
                period.as_secs()
            );
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_cycle().await {
                    warn!(error = %e, "Cleanup cycle failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTypeConfig, EventBus, TypeRegistry};
    use crate::config::Config;
    use crate::error::CacheError;
    use crate::store::{KvStore, MemoryStore};
    use std::time::Duration;

    const MAX_MEMORY: u64 = 1_000_000;

    fn policy() -> CleanupConfig {
        Config::default().cleanup
    }

    fn probe(key: &str, ttl: KeyTtl, size_bytes: u64, idle_secs: u64) -> KeyProbe {
        KeyProbe {
            key: key.to_string(),
            ttl,
            size_bytes,
            idle_secs,
        }
    }

    fn scheduler(store: Arc<MemoryStore>) -> CleanupScheduler {
        let config = Config::default();
        let engine = Arc::new(CacheEngine::new(
            store,
            Arc::new(TypeRegistry::with_defaults()),
            Arc::new(EventBus::new(16)),
            &config.cache,
        ));
        CleanupScheduler::new(engine, config.cleanup)
    }

    #[test]
    fn test_select_expired_and_expiring_soon() {
        let probes = vec![
            probe("a", KeyTtl::Expired, 10, 0),
            probe("b", KeyTtl::Seconds(30), 10, 0),
            probe("c", KeyTtl::Seconds(500), 10, 0),
        ];
        assert_eq!(select_evictions(&probes, 0.95, None, &policy()), vec!["a", "b"]);
    }

    #[test]
    fn test_expiring_soon_needs_pressure() {
        let probes = vec![
            probe("a", KeyTtl::Expired, 10, 0),
            probe("b", KeyTtl::Seconds(30), 10, 0),
        ];
        assert_eq!(select_evictions(&probes, 0.5, None, &policy()), vec!["a"]);
    }

    #[test]
    fn test_excess_over_max_entries_goes_oldest_first() {
        let probes = vec![
            probe("fresh", KeyTtl::Seconds(500), 10, 1),
            probe("stale", KeyTtl::Seconds(500), 10, 900),
            probe("older", KeyTtl::Seconds(500), 10, 300),
        ];
        assert_eq!(select_evictions(&probes, 0.85, Some(1), &policy()), vec!["older", "stale"]);
    }

    #[test]
    fn test_critical_pressure_sheds_large_keys() {
        let mut probes: Vec<KeyProbe> = (0..20)
            .map(|i| probe(&format!("k{:02}", i), KeyTtl::Seconds(500), 100, 0))
            .collect();
        probes.push(probe("huge", KeyTtl::Seconds(500), 50_000, 0));
        probes.push(probe("big", KeyTtl::Seconds(500), 20_000, 0));
        probes.push(probe("bigger", KeyTtl::Seconds(500), 30_000, 0));

        // 23 remaining keys, 10% quota is 2
        assert_eq!(select_evictions(&probes, 0.95, None, &policy()), vec!["bigger", "huge"]);
        assert!(select_evictions(&probes, 0.85, None, &policy()).is_empty());
    }

    #[tokio::test]
    async fn test_cycle_under_critical_pressure() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        store
            .set("blog:article:1", b"{}", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set("blog:article:2", b"{}", Duration::from_secs(30))
            .await
            .unwrap();
        store
            .set("blog:article:3", b"{}", Duration::from_secs(500))
            .await
            .unwrap();
        store.simulate_used_memory(Some(950_000));

        let report = scheduler(store.clone()).run_cycle().await.unwrap();

        assert_eq!(report.keys_removed, 2);
        assert!(report.skipped.is_none());
        assert!((report.memory_usage - 0.95).abs() < 1e-9);
        assert_eq!(store.len().await, 1);
        assert!(store.get("blog:article:3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cycle_below_threshold_is_noop() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        store
            .set("blog:article:1", b"{}", Duration::from_secs(5))
            .await
            .unwrap();
        store.simulate_used_memory(Some(100_000));

        let report = scheduler(store.clone()).run_cycle().await.unwrap();

        assert_eq!(report.keys_removed, 0);
        assert!(report.skipped.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_max_entries_uses_store_idle_time() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        let scheduler = scheduler(store.clone());
        scheduler
            .engine
            .registry()
            .update(CacheTypeConfig::new("tag", 3600).with_max_entries(2))
            .unwrap();
        for i in 0..4 {
            let key = format!("blog:tag:{}", i);
            store.set(&key, b"1", Duration::from_secs(3600)).await.unwrap();
        }
        store.age_key("blog:tag:0", 600).await;
        store.age_key("blog:tag:1", 300).await;
        store.simulate_used_memory(Some(850_000));

        let report = scheduler.run_cycle().await.unwrap();

        assert_eq!(report.keys_removed, 2);
        assert!(store.get("blog:tag:2").await.unwrap().is_some());
        assert!(store.get("blog:tag:3").await.unwrap().is_some());
    }

    /// Memory store whose SCAN fails for one pattern.
    struct BrokenScanStore {
        inner: MemoryStore,
        broken_pattern: &'static str,
    }

    #[async_trait::async_trait]
    impl KvStore for BrokenScanStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
            self.inner.set_nx(key, value, ttl).await
        }
        async fn del(&self, keys: &[String]) -> Result<u64> {
            self.inner.del(keys).await
        }
        async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
            if pattern == self.broken_pattern {
                return Err(CacheError::StoreUnavailable("SCAN failed".to_string()));
            }
            self.inner.scan(cursor, pattern, count).await
        }
        async fn ttl(&self, key: &str) -> Result<KeyTtl> {
            self.inner.ttl(key).await
        }
        async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
            self.inner.memory_usage(key).await
        }
        async fn idle_time(&self, key: &str) -> Result<Option<u64>> {
            self.inner.idle_time(key).await
        }
        async fn info(&self, section: &str) -> Result<String> {
            self.inner.info(section).await
        }
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
        fn name(&self) -> &'static str {
            "broken-scan"
        }
    }

    #[tokio::test]
    async fn test_failing_type_does_not_abort_cycle() {
        let store = Arc::new(BrokenScanStore {
            inner: MemoryStore::new(MAX_MEMORY),
            broken_pattern: "blog:article:*",
        });
        store
            .set("blog:article:1", b"{}", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set("blog:user:1", b"{}", Duration::from_secs(5))
            .await
            .unwrap();
        store.inner.simulate_used_memory(Some(850_000));

        let config = Config::default();
        let engine = Arc::new(CacheEngine::new(
            store.clone(),
            Arc::new(TypeRegistry::with_defaults()),
            Arc::new(EventBus::new(16)),
            &config.cache,
        ));
        let scheduler = CleanupScheduler::new(engine, config.cleanup);
        let mut rx = scheduler.engine.events().subscribe();

        let report = scheduler.run_cycle().await.unwrap();

        let article = report.types.iter().find(|t| t.cache_type == "article").unwrap();
        assert!(article.error.as_deref().unwrap().contains("SCAN failed"));
        let user = report.types.iter().find(|t| t.cache_type == "user").unwrap();
        assert_eq!(user.removed, 1);
        assert!(user.error.is_none());
        assert_eq!(report.keys_removed, 1);
        assert!(store.get("blog:article:1").await.unwrap().is_some());

        assert_eq!(rx.try_recv().unwrap().topic(), "cache.cleanup.completed");
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        let scheduler = scheduler(store);
        scheduler.running.store(true, Ordering::SeqCst);

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.skipped.as_deref(), Some("cycle already running"));
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn test_store_failure_releases_running_flag() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        store.set_available(false);
        let scheduler = scheduler(store);

        assert!(scheduler.run_cycle().await.is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_completion_event_is_published() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        let scheduler = scheduler(store);
        let mut rx = scheduler.engine.events().subscribe();

        scheduler.run_cycle().await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic(), "cache.cleanup.completed");
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let store = Arc::new(MemoryStore::new(MAX_MEMORY));
        let scheduler = Arc::new(scheduler(store));

        let handle = scheduler.spawn();
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
