//! Store Module
//!
//! The backing key-value store seen by the engine, plus its adapters.
//!
//! The engine only ever talks to [`KvStore`]. Two adapters exist: Redis for
//! real deployments and an in-process memory store used by the `memory`
//! backend and by tests.

mod entry;
mod info;
mod memory;
mod redis_store;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{CacheError, Result};

pub use entry::{current_timestamp_ms, StoredEntry};
pub use info::StoreInfo;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

// == Key TTL ==
/// Remaining lifetime of a key as reported by the store's `TTL` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "seconds")]
pub enum KeyTtl {
    /// `-2`: the key is expired or gone
    Expired,
    /// `-1`: the key exists without an expiry
    Persistent,
    /// Remaining seconds
    Seconds(u64),
}

impl KeyTtl {
    /// Maps the raw integer reply of `TTL`.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -1 => KeyTtl::Persistent,
            n if n < 0 => KeyTtl::Expired,
            n => KeyTtl::Seconds(n as u64),
        }
    }

    /// The raw integer form (`-2`, `-1` or seconds).
    pub fn as_raw(&self) -> i64 {
        match self {
            KeyTtl::Expired => -2,
            KeyTtl::Persistent => -1,
            KeyTtl::Seconds(n) => *n as i64,
        }
    }
}

// == KvStore Trait ==
/// Primitives the engine needs from a Redis-class store.
///
/// Every call is a network round trip in the real adapter and must be bounded
/// by the adapter's own timeouts.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `SET key value PX ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// `SET key value NX PX ttl`, returns whether the key was written.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// `DEL key...`, returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// `SCAN cursor MATCH pattern COUNT count`; a returned cursor of 0 ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// `TTL key`
    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// `MEMORY USAGE key`, `None` when the key is gone.
    async fn memory_usage(&self, key: &str) -> Result<Option<u64>>;

    /// `OBJECT IDLETIME key`, `None` when the store cannot tell.
    async fn idle_time(&self, key: &str) -> Result<Option<u64>>;

    /// `INFO section` as raw text.
    async fn info(&self, section: &str) -> Result<String>;

    /// `PING`
    async fn ping(&self) -> Result<()>;

    /// Short adapter name for logs and stats.
    fn name(&self) -> &'static str;
}

// == Timeouts ==
/// Runs one store call, failing with `Timeout` once `limit` has passed.
pub(crate) async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(format!(
            "{} exceeded {:?}",
            operation, limit
        ))),
    }
}

// == Glob Matching ==
/// Matches a key against a `SCAN MATCH` style pattern (`*` and `?`, `\` escapes).
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == k[ki] => {
                    pi += 2;
                    ki += 1;
                    continue;
                }
                c if c != '\\' && c == k[ki] => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                _ => {}
            }
        }
        // Mismatch: backtrack to the last star, letting it absorb one more char
        match star {
            Some((sp, sk)) => {
                pi = sp + 1;
                ki = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
