//! Key Builder Module
//!
//! Deterministic `global:type:key` store keys. No hashing, so two types
//! sharing a prefix would collide; the registry refuses that configuration.

use crate::cache::CacheTypeConfig;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = ':';

/// First segment of stampede lock keys.
pub const LOCK_PREFIX: &str = "lock";

/// True when `segment` can sit between separators without widening a
/// `SCAN MATCH` pattern built from it.
pub fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment
            .chars()
            .any(|c| matches!(c, ':' | '*' | '?' | '[' | ']' | '\\') || c.is_whitespace())
}

// == Key Builder ==
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    global_prefix: String,
}

impl KeyBuilder {
    pub fn new(global_prefix: impl Into<String>) -> Self {
        Self {
            global_prefix: global_prefix.into(),
        }
    }

    pub fn global_prefix(&self) -> &str {
        &self.global_prefix
    }

    /// `global:typePrefix:key`
    pub fn build(&self, config: &CacheTypeConfig, key: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.global_prefix,
            config.key_prefix,
            key,
            sep = KEY_SEPARATOR
        )
    }

    /// `global:cacheType:key` for a type the registry does not know, so
    /// events about it still land under the requested type name.
    pub fn unregistered(&self, cache_type: &str, key: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.global_prefix,
            cache_type,
            key,
            sep = KEY_SEPARATOR
        )
    }

    /// Pattern matching every key of one type.
    pub fn type_pattern(&self, config: &CacheTypeConfig) -> String {
        format!(
            "{}{sep}{}{sep}*",
            self.global_prefix,
            config.key_prefix,
            sep = KEY_SEPARATOR
        )
    }

    /// Scopes a caller pattern under the global prefix.
    pub fn scoped_pattern(&self, pattern: &str) -> String {
        format!("{}{}{}", self.global_prefix, KEY_SEPARATOR, pattern)
    }

    /// Pattern matching every key this engine owns.
    pub fn all_pattern(&self) -> String {
        self.scoped_pattern("*")
    }

    /// Stampede lock key for a full key.
    pub fn lock_key(full_key: &str) -> String {
        format!("{}{}{}", LOCK_PREFIX, KEY_SEPARATOR, full_key)
    }

    /// Second segment of a full key, which is the type prefix.
    pub fn type_segment(full_key: &str) -> Option<&str> {
        full_key
            .split(KEY_SEPARATOR)
            .nth(1)
            .filter(|segment| !segment.is_empty())
    }
}
