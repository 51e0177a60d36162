//! Memory Store Module
//!
//! In-process implementation of [`KvStore`] with Redis-like semantics:
//! expired keys are invisible to every command, reclaimed lazily on access
//! and by a sweep that runs every [`SWEEP_EVERY_WRITES`] writes. SCAN is
//! cursor based, access is tracked for `OBJECT IDLETIME`, and `INFO` is
//! derived from the stored bytes.
//!
//! It also carries two knobs used to exercise degraded paths: an
//! availability switch and a used-memory override.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{glob_match, KeyTtl, KvStore, StoredEntry};
use crate::error::{CacheError, Result};

/// Writes between two sweeps of expired entries.
const SWEEP_EVERY_WRITES: u64 = 128;

// == Memory Store ==
/// Key-value storage with TTL support, shared behind `&self`.
#[derive(Debug)]
pub struct MemoryStore {
    /// Key-value storage
    entries: RwLock<HashMap<String, StoredEntry>>,
    /// Reported as `maxmemory`
    max_memory: u64,
    /// Replaces the computed `used_memory` when set
    used_memory_override: Mutex<Option<u64>>,
    /// When false every call fails with `StoreUnavailable`
    available: AtomicBool,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
    /// Writes since the last sweep
    writes: AtomicU64,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty store reporting `max_memory` bytes as its limit.
    pub fn new(max_memory: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_memory,
            used_memory_override: Mutex::new(None),
            available: AtomicBool::new(true),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Pins the reported `used_memory`, or restores the computed value with `None`.
    pub fn simulate_used_memory(&self, used: Option<u64>) {
        *self.used_memory_override.lock() = used;
    }

    /// Number of keys held, expired-but-unreclaimed ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every expired entry, returning how many were reclaimed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let reclaimed = before - entries.len();
        if reclaimed > 0 {
            debug!(reclaimed = reclaimed, remaining = entries.len(), "Swept expired entries");
        }
        reclaimed
    }

    /// Spawns a task that purges expired entries every `period`, for stores
    /// that see few writes. The returned handle is aborted on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Starting memory store sweeper with interval of {} seconds",
                period.as_secs()
            );
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                store.purge_expired().await;
            }
        })
    }

    /// Counts a write and sweeps once enough have accumulated.
    fn sweep_due(&self) -> bool {
        self.writes.fetch_add(1, Ordering::Relaxed) + 1 >= SWEEP_EVERY_WRITES
    }

    fn sweep(&self, entries: &mut HashMap<String, StoredEntry>) {
        self.writes.store(0, Ordering::Relaxed);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        if before > entries.len() {
            debug!(reclaimed = before - entries.len(), "Swept expired entries on write");
        }
    }

    /// Inserts an entry whose expiry lies `ago_ms` in the past, as if the
    /// store had not reclaimed it yet.
    pub async fn insert_expired(&self, key: &str, value: &[u8], ago_ms: u64) {
        let mut entry = StoredEntry::new(value.to_vec(), Some(0));
        entry.expires_at = entry.expires_at.map(|at| at.saturating_sub(ago_ms));
        self.entries.write().await.insert(key.to_string(), entry);
    }

    /// Pushes a key's last access `secs` into the past.
    pub async fn age_key(&self, key: &str, secs: u64) -> bool {
        match self.entries.write().await.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = entry.last_accessed.saturating_sub(secs * 1000);
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::StoreUnavailable(
                "memory store is marked unavailable".to_string(),
            ))
        }
    }

    async fn used_memory(&self) -> u64 {
        let pinned = *self.used_memory_override.lock();
        if let Some(used) = pinned {
            return used;
        }
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, entry)| entry.footprint(key))
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256 * 1024 * 1024)
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    let ms = ttl.as_millis() as u64;
    if ms == 0 {
        return Err(CacheError::InvalidRequest(
            "invalid expire time in 'set' command".to_string(),
        ));
    }
    Ok(ms)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let mut entries = self.entries.write().await;

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.keyspace_misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if expired {
            // Lazy reclamation on access
            entries.remove(key);
            self.keyspace_misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let entry = entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.value.clone()
        });
        self.keyspace_hits.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check_available()?;
        let ttl_ms = ttl_millis(ttl)?;
        let mut entries = self.entries.write().await;
        if self.sweep_due() {
            self.sweep(&mut entries);
        }
        entries.insert(key.to_string(), StoredEntry::new(value.to_vec(), Some(ttl_ms)));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let ttl_ms = ttl_millis(ttl)?;
        let mut entries = self.entries.write().await;
        if self.sweep_due() {
            self.sweep(&mut entries);
        }

        if entries.get(key).is_some_and(|entry| !entry.is_expired()) {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoredEntry::new(value.to_vec(), Some(ttl_ms)));
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        // Expired entries are reclaimed but, as in Redis, not counted
        let removed = keys
            .iter()
            .filter(|key| {
                entries
                    .remove(key.as_str())
                    .is_some_and(|entry| !entry.is_expired())
            })
            .count();
        Ok(removed as u64)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_available()?;
        let entries = self.entries.read().await;

        // Sorted snapshot so the offset cursor is stable between calls
        let mut matching: Vec<&String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && glob_match(pattern, key))
            .map(|(key, _)| key)
            .collect();
        matching.sort();

        let start = (cursor as usize).min(matching.len());
        let end = (start + count.max(1)).min(matching.len());
        let page = matching[start..end].iter().map(|k| (*k).clone()).collect();
        let next = if end >= matching.len() { 0 } else { end as u64 };

        debug!(pattern = pattern, cursor = cursor, next = next, "memory SCAN");
        Ok((next, page))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check_available()?;
        let entries = self.entries.read().await;
        let ttl = match entries.get(key) {
            None => KeyTtl::Expired,
            Some(entry) if entry.is_expired() => KeyTtl::Expired,
            Some(entry) => match entry.ttl_remaining_ms() {
                None => KeyTtl::Persistent,
                Some(ms) => KeyTtl::Seconds((ms + 500) / 1000),
            },
        };
        Ok(ttl)
    }

    async fn memory_usage(&self, key: &str) -> Result<Option<u64>> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.footprint(key)))
    }

    async fn idle_time(&self, key: &str) -> Result<Option<u64>> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.idle_secs()))
    }

    async fn info(&self, _section: &str) -> Result<String> {
        self.check_available()?;
        let used = self.used_memory().await;
        Ok(format!(
            "# Memory\r\nused_memory:{}\r\nmaxmemory:{}\r\n# Clients\r\nconnected_clients:1\r\n# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            used,
            self.max_memory,
            self.keyspace_hits.load(Ordering::Relaxed),
            self.keyspace_misses.load(Ordering::Relaxed),
        ))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
