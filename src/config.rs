//! Configuration Module
//!
//! Loads engine configuration from environment variables on top of an
//! environment preset (development, test, production).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{is_plain_segment, TypeOverride};
use crate::error::{CacheError, Result};

/// Hard ceiling for any TTL the engine will accept (7 days).
pub const MAX_TTL_SECS: u64 = 604_800;

// == Environment ==
/// Deployment environment selecting the base preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl FromStr for Environment {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(CacheError::ConfigurationInvalid(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

// == Store Backend ==
/// Which backing store adapter to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(CacheError::ConfigurationInvalid(format!(
                "unknown store backend '{}'",
                other
            ))),
        }
    }
}

/// Backing store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Bound on establishing the connection
    pub connect_timeout: Duration,
    /// Bound on every individual command
    pub command_timeout: Duration,
    /// `maxmemory` reported by the memory backend
    pub memory_max_bytes: u64,
}

/// Engine-wide cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global prefix, first segment of every store key
    pub key_prefix: String,
    /// TTL for types introduced by overrides that omit one
    pub default_ttl_secs: u64,
    /// Upper bound applied to every write
    pub max_ttl_secs: u64,
    pub compression_enabled: bool,
    /// Threshold used when a type does not set its own
    pub compression_threshold_bytes: usize,
    pub compression_level: u32,
    /// Lifetime of a stampede lock entry
    pub lock_ttl: Duration,
    /// Wait before the single re-probe after losing the lock race
    pub lock_retry_delay: Duration,
}

/// Metrics and event bus settings.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Fraction of cache events ingested, in (0, 1]
    pub sample_rate: f64,
    pub slow_threshold_ms: f64,
    pub hot_key_limit: usize,
    pub slow_log_capacity: usize,
    pub error_key_limit: usize,
    /// Per-subscriber channel capacity
    pub event_buffer: usize,
}

/// Background cleanup settings.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Pressure at which a cycle starts evicting
    pub memory_threshold: f64,
    /// Pressure at which large keys are shed too
    pub critical_threshold: f64,
    /// Keys with less TTL than this are reclaimed early under pressure
    pub expiring_soon_secs: u64,
    pub large_key_bytes: u64,
    /// Share of remaining keys that may be shed as large keys
    pub large_key_fraction: f64,
    /// Keys per SCAN page and per DEL call
    pub batch_size: usize,
}

// == Config ==
/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Admin HTTP server port
    pub server_port: u16,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub monitoring: MonitoringConfig,
    pub cleanup: CleanupConfig,
    /// Patches applied to the default cache type set at startup
    pub type_overrides: Vec<TypeOverride>,
}

impl Config {
    /// Returns the preset for an environment, before any env overrides.
    pub fn preset(environment: Environment) -> Self {
        let mut config = Self {
            environment,
            server_port: 3000,
            store: StoreConfig {
                backend: StoreBackend::Redis,
                redis_url: "redis://127.0.0.1:6379".to_string(),
                connect_timeout: Duration::from_secs(5),
                command_timeout: Duration::from_secs(2),
                memory_max_bytes: 256 * 1024 * 1024,
            },
            cache: CacheConfig {
                key_prefix: "blog".to_string(),
                default_ttl_secs: 3600,
                max_ttl_secs: MAX_TTL_SECS,
                compression_enabled: true,
                compression_threshold_bytes: 1024,
                compression_level: 6,
                lock_ttl: Duration::from_secs(5),
                lock_retry_delay: Duration::from_millis(50),
            },
            monitoring: MonitoringConfig {
                enabled: true,
                sample_rate: 1.0,
                slow_threshold_ms: 1000.0,
                hot_key_limit: 100,
                slow_log_capacity: 100,
                error_key_limit: 500,
                event_buffer: 10_000,
            },
            cleanup: CleanupConfig {
                enabled: true,
                interval: Duration::from_secs(300),
                memory_threshold: 0.8,
                critical_threshold: 0.9,
                expiring_soon_secs: 60,
                large_key_bytes: 10 * 1024,
                large_key_fraction: 0.1,
                batch_size: 100,
            },
            type_overrides: Vec::new(),
        };

        match environment {
            Environment::Development => {
                config.cleanup.enabled = false;
            }
            Environment::Test => {
                config.store.backend = StoreBackend::Memory;
                config.cache.key_prefix = "blog_test".to_string();
                config.cache.default_ttl_secs = 60;
                config.cache.max_ttl_secs = 300;
                config.cache.compression_enabled = false;
                config.cleanup.enabled = false;
            }
            Environment::Production => {
                config.monitoring.sample_rate = 0.1;
                config.cleanup.interval = Duration::from_secs(120);
                config.cleanup.memory_threshold = 0.75;
            }
        }

        config
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// `APP_ENV` selects the preset; every other variable overrides a single
    /// field of it. Fails when a value is present but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV") {
            Some(value) => value.parse()?,
            None => Environment::Development,
        };
        let mut config = Self::preset(environment);

        if let Some(port) = parse_var(&lookup, "SERVER_PORT")? {
            config.server_port = port;
        }

        // Store
        if let Some(backend) = lookup("CACHE_STORE") {
            config.store.backend = backend.parse()?;
        }
        if let Some(url) = lookup("REDIS_URL") {
            config.store.redis_url = url;
        }
        if let Some(ms) = parse_var(&lookup, "REDIS_CONNECT_TIMEOUT_MS")? {
            config.store.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "REDIS_COMMAND_TIMEOUT_MS")? {
            config.store.command_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var(&lookup, "CACHE_MEMORY_MAX_BYTES")? {
            config.store.memory_max_bytes = bytes;
        }

        // Cache
        if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
            config.cache.key_prefix = prefix;
        }
        if let Some(ttl) = parse_var(&lookup, "CACHE_DEFAULT_TTL")? {
            config.cache.default_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_var(&lookup, "CACHE_MAX_TTL")? {
            config.cache.max_ttl_secs = ttl;
        }
        if let Some(enabled) = parse_flag(&lookup, "CACHE_COMPRESSION_ENABLED")? {
            config.cache.compression_enabled = enabled;
        }
        if let Some(bytes) = parse_var(&lookup, "CACHE_COMPRESSION_THRESHOLD")? {
            config.cache.compression_threshold_bytes = bytes;
        }
        if let Some(ms) = parse_var(&lookup, "CACHE_LOCK_TTL_MS")? {
            config.cache.lock_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "CACHE_LOCK_RETRY_DELAY_MS")? {
            config.cache.lock_retry_delay = Duration::from_millis(ms);
        }

        // Monitoring
        if let Some(enabled) = parse_flag(&lookup, "CACHE_MONITORING_ENABLED")? {
            config.monitoring.enabled = enabled;
        }
        if let Some(rate) = parse_var(&lookup, "CACHE_MONITORING_SAMPLE_RATE")? {
            config.monitoring.sample_rate = rate;
        }
        if let Some(ms) = parse_var(&lookup, "CACHE_SLOW_THRESHOLD_MS")? {
            config.monitoring.slow_threshold_ms = ms;
        }
        if let Some(buffer) = parse_var(&lookup, "CACHE_EVENT_BUFFER")? {
            config.monitoring.event_buffer = buffer;
        }

        // Cleanup
        if let Some(enabled) = parse_flag(&lookup, "CACHE_CLEANUP_ENABLED")? {
            config.cleanup.enabled = enabled;
        }
        if let Some(secs) = parse_var(&lookup, "CACHE_CLEANUP_INTERVAL")? {
            config.cleanup.interval = Duration::from_secs(secs);
        }
        if let Some(ratio) = parse_var(&lookup, "CACHE_CLEANUP_MEMORY_THRESHOLD")? {
            config.cleanup.memory_threshold = ratio;
        }
        if let Some(ratio) = parse_var(&lookup, "CACHE_CLEANUP_CRITICAL_THRESHOLD")? {
            config.cleanup.critical_threshold = ratio;
        }

        if let Some(raw) = lookup("CACHE_TYPE_OVERRIDES") {
            config.type_overrides = serde_json::from_str(&raw).map_err(|e| {
                CacheError::ConfigurationInvalid(format!("CACHE_TYPE_OVERRIDES: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CacheError::ConfigurationInvalid(msg));

        if self.cache.key_prefix.is_empty() {
            return invalid("global key prefix cannot be empty".to_string());
        }
        if !is_plain_segment(&self.cache.key_prefix) {
            return invalid(format!(
                "global key prefix '{}' contains a separator or pattern character",
                self.cache.key_prefix
            ));
        }
        if self.cache.max_ttl_secs == 0 || self.cache.max_ttl_secs > MAX_TTL_SECS {
            return invalid(format!(
                "max TTL must be within 1..={} seconds",
                MAX_TTL_SECS
            ));
        }
        if self.cache.default_ttl_secs > self.cache.max_ttl_secs {
            return invalid("default TTL exceeds max TTL".to_string());
        }
        if !(self.monitoring.sample_rate > 0.0 && self.monitoring.sample_rate <= 1.0) {
            return invalid("sample rate must be within (0, 1]".to_string());
        }
        if self.monitoring.event_buffer == 0 {
            return invalid("event buffer must be positive".to_string());
        }
        let cleanup = &self.cleanup;
        if !(cleanup.memory_threshold > 0.0 && cleanup.memory_threshold <= 1.0) {
            return invalid("cleanup memory threshold must be within (0, 1]".to_string());
        }
        if cleanup.critical_threshold < cleanup.memory_threshold {
            return invalid("critical threshold is below the memory threshold".to_string());
        }
        if cleanup.batch_size == 0 || cleanup.interval.is_zero() {
            return invalid("cleanup batch size and interval must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::preset(Environment::Development)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            CacheError::ConfigurationInvalid(format!("{} has invalid value '{}'", name, raw))
        }),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, name: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(v) => Err(CacheError::ConfigurationInvalid(format!(
            "{} has invalid flag '{}'",
            name, v
        ))),
        None => Ok(None),
    }
}
