//! Cache Engine Module
//!
//! Typed get/set/delete over the backing store with key building,
//! compression, tag invalidation and event emission.
//!
//! Reads and writes are best-effort: `get`, `set` and `delete` never return
//! store or serialization failures, they log them, emit an `error` event and
//! degrade to a miss or a no-op. The `try_*` variants surface the failure
//! for callers that apply their own fallback policy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheEvent, CacheEventKind, CacheTypeConfig, CompressionCodec, EngineEvent, EventBus,
    KeyBuilder, TypeRegistry,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::KvStore;

/// Upper bound on keys per `DEL` and per `SCAN` page.
pub const DELETE_BATCH_SIZE: usize = 100;

// == Cache Engine ==
pub struct CacheEngine {
    store: Arc<dyn KvStore>,
    registry: Arc<TypeRegistry>,
    keys: KeyBuilder,
    codec: CompressionCodec,
    events: Arc<EventBus>,
    max_ttl: Duration,
    default_threshold: usize,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("store", &self.store.name())
            .field("keys", &self.keys)
            .field("codec", &self.codec)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl CacheEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<TypeRegistry>,
        events: Arc<EventBus>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            registry,
            keys: KeyBuilder::new(config.key_prefix.clone()),
            codec: CompressionCodec::new(config.compression_enabled, config.compression_level),
            events,
            max_ttl: Duration::from_secs(config.max_ttl_secs),
            default_threshold: config.compression_threshold_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Store key for `key` under `cache_type`.
    pub fn full_key(&self, key: &str, cache_type: &str) -> Result<String> {
        let config = self.registry.require(cache_type)?;
        Ok(self.keys.build(&config, key))
    }

    /// `min(override ?? type TTL, global max)`.
    pub fn effective_ttl(&self, config: &CacheTypeConfig, ttl_override: Option<Duration>) -> Duration {
        ttl_override.unwrap_or_else(|| config.ttl()).min(self.max_ttl)
    }

    /// Looks the type up; `None` when the type is disabled.
    fn resolve(&self, key: &str, cache_type: &str) -> Result<Option<(Arc<CacheTypeConfig>, String)>> {
        let config = self.registry.require(cache_type)?;
        if !config.enabled {
            debug!(cache_type = cache_type, "Cache type disabled, bypassing store");
            return Ok(None);
        }
        let full_key = self.keys.build(&config, key);
        Ok(Some((config, full_key)))
    }

    // == Get ==
    /// Reads and deserializes a value, surfacing store failures.
    ///
    /// An entry that cannot be decoded is reported as an `error` event and
    /// read as absent, so callers recompute and overwrite it.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str, cache_type: &str) -> Result<Option<T>> {
        let started = Instant::now();
        let (_, full_key) = match self.resolve(key, cache_type) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.emit(
                    CacheEventKind::Error,
                    &self.keys.unregistered(cache_type, key),
                    started,
                    Some(&e),
                );
                return Err(e);
            }
        };

        match self.store.get(&full_key).await {
            Ok(Some(stored)) => match self.decode::<T>(stored) {
                Ok(value) => {
                    self.emit(CacheEventKind::Hit, &full_key, started, None);
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Undecodable cache entry, treating as miss");
                    self.emit(CacheEventKind::Error, &full_key, started, Some(&e));
                    Ok(None)
                }
            },
            Ok(None) => {
                self.emit(CacheEventKind::Miss, &full_key, started, None);
                Ok(None)
            }
            Err(e) => {
                self.emit(CacheEventKind::Error, &full_key, started, Some(&e));
                Err(e)
            }
        }
    }

    /// Reads a value; any failure is logged and reads as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, cache_type: &str) -> Option<T> {
        match self.try_get(key, cache_type).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, cache_type = cache_type, error = %e, "Cache get failed");
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, stored: Vec<u8>) -> Result<T> {
        let json = self.codec.decode(stored)?;
        Ok(serde_json::from_slice(&json)?)
    }

    // == Set ==
    /// Serializes and writes a value, surfacing failures.
    ///
    /// Returns `false` without touching the store when the type is disabled
    /// or its effective TTL is zero.
    pub async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        cache_type: &str,
        ttl_override: Option<Duration>,
    ) -> Result<bool> {
        let started = Instant::now();
        let (config, full_key) = match self.resolve(key, cache_type) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.emit(
                    CacheEventKind::Error,
                    &self.keys.unregistered(cache_type, key),
                    started,
                    Some(&e),
                );
                return Err(e);
            }
        };

        let ttl = self.effective_ttl(&config, ttl_override);
        if ttl.is_zero() {
            debug!(key = %full_key, "Zero TTL, skipping cache write");
            return Ok(false);
        }

        let threshold = config
            .compression_threshold_bytes
            .unwrap_or(self.default_threshold);
        let encoded = serde_json::to_vec(value)
            .map_err(CacheError::from)
            .and_then(|json| self.codec.encode(json, threshold));
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                self.emit(CacheEventKind::Error, &full_key, started, Some(&e));
                return Err(e);
            }
        };

        match self.store.set(&full_key, &encoded.bytes, ttl).await {
            Ok(()) => {
                debug!(
                    key = %full_key,
                    ttl_secs = ttl.as_secs(),
                    compressed = encoded.compressed,
                    original_size = encoded.original_size,
                    stored_size = encoded.bytes.len(),
                    "Cache SET"
                );
                self.emit(CacheEventKind::Set, &full_key, started, None);
                Ok(true)
            }
            Err(e) => {
                self.emit(CacheEventKind::Error, &full_key, started, Some(&e));
                Err(e)
            }
        }
    }

    /// Best-effort write; returns whether the value reached the store.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        cache_type: &str,
        ttl_override: Option<Duration>,
    ) -> bool {
        match self.try_set(key, value, cache_type, ttl_override).await {
            Ok(written) => written,
            Err(e) => {
                warn!(key = key, cache_type = cache_type, error = %e, "Cache set failed");
                false
            }
        }
    }

    // == Delete ==
    /// Removes one key, surfacing failures. Returns whether a key was removed.
    pub async fn try_delete(&self, key: &str, cache_type: &str) -> Result<bool> {
        let started = Instant::now();
        let (_, full_key) = match self.resolve(key, cache_type) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return Ok(false),
            Err(e) => {
                self.emit(
                    CacheEventKind::Error,
                    &self.keys.unregistered(cache_type, key),
                    started,
                    Some(&e),
                );
                return Err(e);
            }
        };

        match self.store.del(std::slice::from_ref(&full_key)).await {
            Ok(removed) => {
                self.emit(CacheEventKind::Delete, &full_key, started, None);
                Ok(removed > 0)
            }
            Err(e) => {
                self.emit(CacheEventKind::Error, &full_key, started, Some(&e));
                Err(e)
            }
        }
    }

    /// Best-effort single-key removal.
    pub async fn delete(&self, key: &str, cache_type: &str) -> bool {
        match self.try_delete(key, cache_type).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = key, cache_type = cache_type, error = %e, "Cache delete failed");
                false
            }
        }
    }

    // == Bulk Invalidation ==
    /// Scans every key matching a raw store pattern and deletes them in
    /// batches of [`DELETE_BATCH_SIZE`]. Keys written while the scan runs
    /// may survive.
    pub async fn clear_by_pattern(&self, pattern: &str) -> Result<u64> {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0;

        loop {
            let (next, page) = self.store.scan(cursor, pattern, DELETE_BATCH_SIZE).await?;
            // SCAN may return a key more than once
            keys.extend(page.into_iter().filter(|key| seen.insert(key.clone())));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            removed += self.store.del(batch).await?;
        }

        info!(
            pattern = pattern,
            matched = keys.len(),
            removed = removed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Cleared keys by pattern"
        );
        Ok(removed)
    }

    /// Clears every type whose tags intersect `tags`.
    pub async fn clear_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<u64> {
        let mut removed = 0;
        for config in self.registry.tagged_with_any(tags) {
            removed += self.clear_by_pattern(&self.keys.type_pattern(&config)).await?;
        }
        Ok(removed)
    }

    /// Clears every key of one type, enabled or not.
    pub async fn clear_type(&self, cache_type: &str) -> Result<u64> {
        let config = self.registry.require(cache_type)?;
        self.clear_by_pattern(&self.keys.type_pattern(&config)).await
    }

    /// Clears every key under the global prefix.
    pub async fn clear_all(&self) -> Result<u64> {
        self.clear_by_pattern(&self.keys.all_pattern()).await
    }

    fn emit(&self, kind: CacheEventKind, key: &str, started: Instant, error: Option<&CacheError>) {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut event = CacheEvent::new(kind, key, duration_ms);
        if let Some(e) = error {
            event = event.with_error(e.to_string());
        }
        self.events.publish(EngineEvent::Cache(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{with_timeout, KeyTtl, MemoryStore};
    use serde_json::{json, Value};

    struct Harness {
        store: Arc<MemoryStore>,
        engine: CacheEngine,
        events: tokio::sync::mpsc::Receiver<EngineEvent>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::default());
        let bus = Arc::new(EventBus::new(1024));
        let events = bus.subscribe();
        let engine = CacheEngine::new(
            store.clone(),
            Arc::new(TypeRegistry::with_defaults()),
            bus,
            &Config::default().cache,
        );
        Harness { store, engine, events }
    }

    fn next_kind(rx: &mut tokio::sync::mpsc::Receiver<EngineEvent>) -> Option<CacheEventKind> {
        match rx.try_recv().ok()? {
            EngineEvent::Cache(event) => Some(event.kind),
            EngineEvent::CleanupCompleted(_) => None,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let mut h = harness();
        assert!(h.engine.set("42", &json!({"title": "Hello"}), "article", None).await);

        let value: Option<Value> = h.engine.get("42", "article").await;
        assert_eq!(value, Some(json!({"title": "Hello"})));

        assert_eq!(next_kind(&mut h.events), Some(CacheEventKind::Set));
        assert_eq!(next_kind(&mut h.events), Some(CacheEventKind::Hit));
    }

    #[tokio::test]
    async fn test_miss_emits_event() {
        let mut h = harness();
        let value: Option<Value> = h.engine.get("missing", "article").await;

        assert!(value.is_none());
        assert_eq!(next_kind(&mut h.events), Some(CacheEventKind::Miss));
    }

    #[tokio::test]
    async fn test_full_key_layout() {
        let h = harness();
        h.engine.set("7", &"x", "user", None).await;

        assert_eq!(h.engine.full_key("7", "user").unwrap(), "blog:user:7");
        assert!(h.store.get("blog:user:7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_is_capped() {
        let h = harness();
        let article = h.engine.registry().get("article").unwrap();

        assert_eq!(h.engine.effective_ttl(&article, None), Duration::from_secs(600));
        assert_eq!(
            h.engine
                .effective_ttl(&article, Some(Duration::from_secs(10 * 604_800))),
            h.engine.max_ttl()
        );
    }

    #[tokio::test]
    async fn test_unknown_type_degrades() {
        let mut h = harness();
        let value: Option<Value> = h.engine.get("1", "nope").await;
        assert!(value.is_none());
        assert!(!h.engine.set("1", &1, "nope", None).await);
        assert_eq!(next_kind(&mut h.events), Some(CacheEventKind::Error));

        let err = h.engine.try_get::<Value>("1", "nope").await.unwrap_err();
        assert!(matches!(err, CacheError::UnknownType(_)));
    }

    #[tokio::test]
    async fn test_unknown_type_event_names_requested_type() {
        let mut h = harness();
        let _: Option<Value> = h.engine.get("article:1", "gallery").await;

        match h.events.try_recv().unwrap() {
            EngineEvent::Cache(event) => {
                assert_eq!(event.kind, CacheEventKind::Error);
                assert_eq!(event.key, "blog:gallery:article:1");
                assert_eq!(KeyBuilder::type_segment(&event.key), Some("gallery"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_type_bypasses_store() {
        let h = harness();
        h.engine
            .registry()
            .update(CacheTypeConfig::new("stats", 900).disabled())
            .unwrap();

        assert!(!h.engine.set("daily", &1, "stats", None).await);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_outage_never_throws() {
        let mut h = harness();
        h.store.set_available(false);

        let value: Option<Value> = h.engine.get("1", "article").await;
        assert!(value.is_none());
        assert!(!h.engine.set("1", &1, "article", None).await);
        assert!(!h.engine.delete("1", "article").await);

        assert_eq!(next_kind(&mut h.events), Some(CacheEventKind::Error));
        assert!(h.engine.try_get::<Value>("1", "article").await.is_err());
    }

    /// Store whose every call outlasts its command timeout.
    struct StalledStore {
        delay: Duration,
        command_timeout: Duration,
    }

    impl StalledStore {
        async fn stall<T>(&self, operation: &str, reply: T) -> Result<T> {
            with_timeout(self.command_timeout, operation, async {
                tokio::time::sleep(self.delay).await;
                Ok(reply)
            })
            .await
        }
    }

    #[async_trait::async_trait]
    impl KvStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            self.stall("GET", None).await
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
            self.stall("SET", ()).await
        }
        async fn set_nx(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<bool> {
            self.stall("SET NX", true).await
        }
        async fn del(&self, _keys: &[String]) -> Result<u64> {
            self.stall("DEL", 0).await
        }
        async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> Result<(u64, Vec<String>)> {
            self.stall("SCAN", (0, Vec::new())).await
        }
        async fn ttl(&self, _key: &str) -> Result<KeyTtl> {
            self.stall("TTL", KeyTtl::Expired).await
        }
        async fn memory_usage(&self, _key: &str) -> Result<Option<u64>> {
            self.stall("MEMORY USAGE", None).await
        }
        async fn idle_time(&self, _key: &str) -> Result<Option<u64>> {
            self.stall("OBJECT IDLETIME", None).await
        }
        async fn info(&self, _section: &str) -> Result<String> {
            self.stall("INFO", String::new()).await
        }
        async fn ping(&self) -> Result<()> {
            self.stall("PING", ()).await
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_command_timeout_reads_as_miss_with_error_event() {
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let store = Arc::new(StalledStore {
            delay: Duration::from_secs(5),
            command_timeout: Duration::from_millis(20),
        });
        let engine = CacheEngine::new(
            store,
            Arc::new(TypeRegistry::with_defaults()),
            bus,
            &Config::default().cache,
        );

        let started = std::time::Instant::now();
        let value: Option<Value> = engine.get("1", "article").await;
        assert!(value.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));

        match events.try_recv().unwrap() {
            EngineEvent::Cache(event) => {
                assert_eq!(event.kind, CacheEventKind::Error);
                assert!(event.error.unwrap().contains("timed out"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            engine.try_get::<Value>("1", "article").await,
            Err(CacheError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_absent() {
        let h = harness();
        h.store
            .set("blog:article:9", b"{not json", Duration::from_secs(60))
            .await
            .unwrap();

        let value: Option<Value> = h.engine.try_get("9", "article").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let h = harness();
        h.engine.set("1", &1, "comment", None).await;

        assert!(h.engine.delete("1", "comment").await);
        assert!(!h.engine.delete("1", "comment").await);
        assert!(h.engine.get::<i32>("1", "comment").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_by_pattern_batches() {
        let h = harness();
        for i in 0..250 {
            h.engine.set(&i.to_string(), &i, "comment", None).await;
        }
        h.engine.set("1", &1, "user", None).await;

        let removed = h.engine.clear_by_pattern("blog:comment:*").await.unwrap();
        assert_eq!(removed, 250);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_by_tags_propagates_store_errors() {
        let h = harness();
        h.store.set_available(false);
        assert!(h.engine.clear_by_tags(&["content"]).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_all_only_touches_global_prefix() {
        let h = harness();
        h.engine.set("1", &1, "article", None).await;
        h.engine.set("2", &2, "session", None).await;
        h.store
            .set("other_app:x", b"1", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(h.engine.clear_all().await.unwrap(), 2);
        assert_eq!(h.store.len().await, 1);
    }
}
