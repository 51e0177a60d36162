//! Cache-Aside Module
//!
//! Read-through wrapper around an expensive operation: probe the cache, on a
//! miss take the stampede lock, recompute, populate and return. Callers that
//! lose the lock wait once for the winner and re-probe, then compute
//! uncached if the value still is not there.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheEngine, StampedeGuard};
use crate::error::CacheError;

/// What to do when the store fails while serving a read-through call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Compute directly, quietly.
    Skip,
    /// Return the store error to the caller.
    #[serde(rename = "error")]
    Propagate,
    /// Compute directly and log a warning.
    #[default]
    Log,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsideOptions {
    pub ttl: Option<Duration>,
    pub fallback: FallbackPolicy,
}

impl AsideOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }
}

/// An operation whose result can be served from the cache.
#[async_trait]
pub trait CacheAwareOperation: Send + Sync {
    type Output: Serialize + DeserializeOwned + Send;
    type Error: From<CacheError> + Send;

    /// Logical key, without any prefix.
    fn cache_key(&self) -> String;

    fn cache_type(&self) -> &str;

    fn options(&self) -> AsideOptions {
        AsideOptions::default()
    }

    async fn execute(&self) -> Result<Self::Output, Self::Error>;
}

// == Cache Aside ==
#[derive(Debug, Clone)]
pub struct CacheAside {
    engine: Arc<CacheEngine>,
    guard: StampedeGuard,
}

impl CacheAside {
    pub fn new(engine: Arc<CacheEngine>, guard: StampedeGuard) -> Self {
        Self { engine, guard }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    /// Returns the cached value for `key`, computing and caching it on a miss.
    ///
    /// Errors from `compute` are returned as-is and nothing is cached.
    /// Store failures follow `options.fallback`; a failed write of a
    /// freshly computed value is only logged.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        cache_type: &str,
        options: &AsideOptions,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Probe
        match self.engine.try_get::<T>(key, cache_type).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => return self.fall_back(e, key, options, compute).await,
        }

        let config = match self.engine.registry().require(cache_type) {
            Ok(config) => config,
            Err(e) => return self.fall_back(e, key, options, compute).await,
        };
        if !config.enabled {
            return compute().await;
        }
        let full_key = self.engine.keys().build(&config, key);

        // Acquire
        match self.guard.acquire(&full_key).await {
            Ok(()) => {
                let value = compute().await?;
                if !self.engine.set(key, &value, cache_type, options.ttl).await {
                    debug!(key = %full_key, "Computed value was not cached");
                }
                Ok(value)
            }
            Err(CacheError::LockContention(_)) => {
                debug!(key = %full_key, "Recompute in progress elsewhere, waiting");
                self.guard.back_off().await;

                match self.engine.try_get::<T>(key, cache_type).await {
                    Ok(Some(value)) => Ok(value),
                    Ok(None) => compute().await,
                    Err(e) => {
                        debug!(key = %full_key, error = %e, "Re-probe failed");
                        compute().await
                    }
                }
            }
            Err(e) => self.fall_back(e, key, options, compute).await,
        }
    }

    async fn fall_back<T, E, F, Fut>(
        &self,
        error: CacheError,
        key: &str,
        options: &AsideOptions,
        compute: F,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match options.fallback {
            FallbackPolicy::Propagate => Err(E::from(error)),
            FallbackPolicy::Skip => {
                debug!(key = key, error = %error, "Cache unavailable, computing uncached");
                compute().await
            }
            FallbackPolicy::Log => {
                warn!(key = key, error = %error, "Cache unavailable, computing uncached");
                compute().await
            }
        }
    }

    /// Runs a [`CacheAwareOperation`] through [`Self::get_or_compute`].
    pub async fn run<O: CacheAwareOperation>(&self, operation: &O) -> Result<O::Output, O::Error> {
        let key = operation.cache_key();
        let options = operation.options();
        self.get_or_compute(&key, operation.cache_type(), &options, move || operation.execute())
            .await
    }

    /// Runs a write and, when it succeeds, clears every type tagged with
    /// any of `tags`. Invalidation failures are logged, not returned.
    pub async fn invalidating<S, T, E, Fut>(&self, tags: &[S], write: Fut) -> Result<T, E>
    where
        S: AsRef<str>,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = write.await?;
        if let Err(e) = self.engine.clear_by_tags(tags).await {
            let tags: Vec<&str> = tags.iter().map(AsRef::as_ref).collect();
            warn!(tags = ?tags, error = %e, "Invalidation after write failed");
        }
        Ok(result)
    }
}
