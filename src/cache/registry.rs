//! Cache Type Registry Module
//!
//! Maps a logical cache type ("article", "session", ...) to its
//! configuration. Built once at startup and shared by reference; updates
//! swap in a fresh map so readers never see a half-applied change.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::is_plain_segment;
use crate::config::{Config, MAX_TTL_SECS};
use crate::error::{CacheError, Result};

// == Cache Type Config ==
/// Configuration for one logical cache type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheTypeConfig {
    #[serde(rename = "type")]
    pub cache_type: String,
    pub key_prefix: String,
    #[serde(rename = "defaultTtlSeconds")]
    pub default_ttl_secs: u64,
    pub tags: BTreeSet<String>,
    pub enabled: bool,
    /// Soft cap enforced by the cleanup scheduler, not by writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    /// Falls back to the engine-wide threshold when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_threshold_bytes: Option<usize>,
}

impl CacheTypeConfig {
    /// A type whose key prefix equals its name, with no tags.
    pub fn new(cache_type: impl Into<String>, ttl_secs: u64) -> Self {
        let cache_type = cache_type.into();
        Self {
            key_prefix: cache_type.clone(),
            cache_type,
            default_ttl_secs: ttl_secs,
            tags: BTreeSet::new(),
            enabled: true,
            max_entries: None,
            compression_threshold_bytes: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = Some(bytes);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// True when any of `tags` is one of this type's tags.
    pub fn has_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag.as_ref()))
    }

    /// Checks the identifier, prefix and TTL invariants.
    pub fn validate(&self) -> Result<()> {
        if self.cache_type.trim().is_empty() {
            return Err(CacheError::ConfigurationInvalid(
                "cache type cannot be empty".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(CacheError::ConfigurationInvalid(format!(
                "key prefix of '{}' cannot be empty",
                self.cache_type
            )));
        }
        if !is_plain_segment(&self.key_prefix) {
            return Err(CacheError::ConfigurationInvalid(format!(
                "key prefix '{}' contains a separator or pattern character",
                self.key_prefix
            )));
        }
        if self.default_ttl_secs > MAX_TTL_SECS {
            return Err(CacheError::ConfigurationInvalid(format!(
                "TTL of '{}' is {}s, above the {}s limit",
                self.cache_type, self.default_ttl_secs, MAX_TTL_SECS
            )));
        }
        if self.max_entries == Some(0) {
            return Err(CacheError::ConfigurationInvalid(format!(
                "maxEntries of '{}' must be positive",
                self.cache_type
            )));
        }
        Ok(())
    }
}

// == Type Override ==
/// Partial patch over a cache type, from configuration or the admin API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeOverride {
    #[serde(rename = "type", default)]
    pub cache_type: String,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub compression_threshold_bytes: Option<usize>,
}

impl TypeOverride {
    /// Applies the patch to `base`, or builds a new type when there is none.
    pub fn apply(&self, base: Option<&CacheTypeConfig>, default_ttl_secs: u64) -> CacheTypeConfig {
        let mut config = base
            .cloned()
            .unwrap_or_else(|| CacheTypeConfig::new(self.cache_type.clone(), default_ttl_secs));

        if let Some(prefix) = &self.key_prefix {
            config.key_prefix = prefix.clone();
        }
        if let Some(ttl) = self.ttl {
            config.default_ttl_secs = ttl;
        }
        if let Some(tags) = &self.tags {
            config.tags = tags.clone();
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if self.max_entries.is_some() {
            config.max_entries = self.max_entries;
        }
        if self.compression_threshold_bytes.is_some() {
            config.compression_threshold_bytes = self.compression_threshold_bytes;
        }
        config
    }
}

/// The blog platform's built-in cache types.
pub fn default_types() -> Vec<CacheTypeConfig> {
    vec![
        CacheTypeConfig::new("article", 600)
            .with_tags(["article", "content"])
            .with_max_entries(10_000)
            .with_compression_threshold(1024),
        CacheTypeConfig::new("article_list", 300)
            .with_tags(["article", "content", "list"])
            .with_max_entries(2_000)
            .with_compression_threshold(2048),
        CacheTypeConfig::new("user", 1800)
            .with_tags(["user", "profile"])
            .with_max_entries(5_000),
        CacheTypeConfig::new("tag", 3600).with_tags(["tag", "content"]),
        CacheTypeConfig::new("comment", 300)
            .with_tags(["comment", "article"])
            .with_max_entries(20_000),
        CacheTypeConfig::new("session", 86_400).with_tags(["session", "auth"]),
        CacheTypeConfig::new("search", 180)
            .with_tags(["search", "content"])
            .with_max_entries(1_000)
            .with_compression_threshold(4096),
        CacheTypeConfig::new("stats", 900).with_tags(["stats"]),
    ]
}

type TypeMap = HashMap<String, Arc<CacheTypeConfig>>;

// == Type Registry ==
/// Read-mostly registry of cache types with copy-on-write replacement.
#[derive(Debug)]
pub struct TypeRegistry {
    types: RwLock<Arc<TypeMap>>,
}

impl TypeRegistry {
    /// Builds a registry, validating every entry and rejecting duplicate
    /// type names or key prefixes.
    pub fn new<I>(configs: I) -> Result<Self>
    where
        I: IntoIterator<Item = CacheTypeConfig>,
    {
        let mut map = TypeMap::new();
        for config in configs {
            config.validate()?;
            check_prefix_free(&map, &config)?;
            if map.contains_key(&config.cache_type) {
                return Err(CacheError::ConfigurationInvalid(format!(
                    "cache type '{}' registered twice",
                    config.cache_type
                )));
            }
            map.insert(config.cache_type.clone(), Arc::new(config));
        }
        Ok(Self {
            types: RwLock::new(Arc::new(map)),
        })
    }

    /// Registry holding [`default_types`].
    pub fn with_defaults() -> Self {
        let mut map = TypeMap::new();
        for config in default_types() {
            map.insert(config.cache_type.clone(), Arc::new(config));
        }
        Self {
            types: RwLock::new(Arc::new(map)),
        }
    }

    /// Defaults with the configured overrides applied on top.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::with_defaults();
        for patch in &config.type_overrides {
            registry.apply_override(patch, config.cache.default_ttl_secs)?;
        }
        Ok(registry)
    }

    /// Current immutable view of all types.
    pub fn snapshot(&self) -> Arc<TypeMap> {
        self.types.read().clone()
    }

    pub fn get(&self, cache_type: &str) -> Option<Arc<CacheTypeConfig>> {
        self.types.read().get(cache_type).cloned()
    }

    /// Like [`TypeRegistry::get`] but failing with `UnknownType`.
    pub fn require(&self, cache_type: &str) -> Result<Arc<CacheTypeConfig>> {
        self.get(cache_type)
            .ok_or_else(|| CacheError::UnknownType(cache_type.to_string()))
    }

    /// All types, ordered by name.
    pub fn all(&self) -> Vec<Arc<CacheTypeConfig>> {
        let mut types: Vec<_> = self.snapshot().values().cloned().collect();
        types.sort_by(|a, b| a.cache_type.cmp(&b.cache_type));
        types
    }

    pub fn enabled(&self) -> Vec<Arc<CacheTypeConfig>> {
        self.all().into_iter().filter(|t| t.enabled).collect()
    }

    /// Types whose tag set intersects `tags`.
    pub fn tagged_with_any<S: AsRef<str>>(&self, tags: &[S]) -> Vec<Arc<CacheTypeConfig>> {
        self.all()
            .into_iter()
            .filter(|t| t.has_any_tag(tags))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Validates `config` and replaces (or adds) its entry atomically.
    pub fn update(&self, config: CacheTypeConfig) -> Result<Arc<CacheTypeConfig>> {
        config.validate()?;
        let mut guard = self.types.write();
        self.replace_locked(&mut guard, config)
    }

    /// Applies a patch to the live entry (or creates the type) atomically.
    pub fn apply_override(
        &self,
        patch: &TypeOverride,
        default_ttl_secs: u64,
    ) -> Result<Arc<CacheTypeConfig>> {
        let mut guard = self.types.write();
        let config = patch.apply(guard.get(&patch.cache_type).map(Arc::as_ref), default_ttl_secs);
        config.validate()?;
        self.replace_locked(&mut guard, config)
    }

    fn replace_locked(
        &self,
        guard: &mut Arc<TypeMap>,
        config: CacheTypeConfig,
    ) -> Result<Arc<CacheTypeConfig>> {
        let mut next: TypeMap = (**guard).clone();
        next.remove(&config.cache_type);
        check_prefix_free(&next, &config)?;

        let entry = Arc::new(config);
        next.insert(entry.cache_type.clone(), entry.clone());
        *guard = Arc::new(next);

        info!(
            cache_type = %entry.cache_type,
            ttl = entry.default_ttl_secs,
            enabled = entry.enabled,
            "Cache type updated"
        );
        Ok(entry)
    }
}

fn check_prefix_free(map: &TypeMap, config: &CacheTypeConfig) -> Result<()> {
    match map
        .values()
        .find(|other| other.key_prefix == config.key_prefix && other.cache_type != config.cache_type)
    {
        Some(other) => Err(CacheError::ConfigurationInvalid(format!(
            "key prefix '{}' already used by '{}'",
            config.key_prefix, other.cache_type
        ))),
        None => Ok(()),
    }
}
