//! Stampede Guard Module
//!
//! Short-lived store locks that let one caller recompute a missing entry
//! while the others wait briefly and re-probe.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::KeyBuilder;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::KvStore;

const LOCK_TOKEN: &[u8] = b"1";

// == Stampede Guard ==
#[derive(Clone)]
pub struct StampedeGuard {
    store: Arc<dyn KvStore>,
    lock_ttl: Duration,
    retry_delay: Duration,
}

impl std::fmt::Debug for StampedeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampedeGuard")
            .field("lock_ttl", &self.lock_ttl)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl StampedeGuard {
    pub fn new(store: Arc<dyn KvStore>, lock_ttl: Duration, retry_delay: Duration) -> Self {
        Self {
            store,
            lock_ttl,
            retry_delay,
        }
    }

    pub fn from_config(store: Arc<dyn KvStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.lock_ttl, config.lock_retry_delay)
    }

    /// Takes the lock for `full_key`.
    ///
    /// The lock is never released explicitly; it lapses after the lock TTL.
    /// Returns `LockContention` when another caller holds it.
    pub async fn acquire(&self, full_key: &str) -> Result<()> {
        let lock_key = KeyBuilder::lock_key(full_key);
        if self.store.set_nx(&lock_key, LOCK_TOKEN, self.lock_ttl).await? {
            debug!(lock = %lock_key, "Acquired recompute lock");
            Ok(())
        } else {
            Err(CacheError::LockContention(full_key.to_string()))
        }
    }

    /// Sleeps for the fixed contention back-off.
    pub async fn back_off(&self) {
        tokio::time::sleep(self.retry_delay).await;
    }
}
