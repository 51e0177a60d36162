//! Parsing of the store's `INFO` text blob.

use serde::Serialize;

/// The handful of `INFO` fields the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreInfo {
    pub used_memory: u64,
    /// `0` means the store has no memory limit
    pub max_memory: u64,
    pub connected_clients: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

impl StoreInfo {
    /// Parses `field:value` lines; unknown fields, section headers and
    /// malformed numbers are ignored.
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u64>() else {
                continue;
            };
            match field {
                "used_memory" => info.used_memory = value,
                "maxmemory" => info.max_memory = value,
                "connected_clients" => info.connected_clients = value,
                "keyspace_hits" => info.keyspace_hits = value,
                "keyspace_misses" => info.keyspace_misses = value,
                _ => {}
            }
        }
        info
    }

    /// `used_memory / maxmemory`, or 0.0 when the store is unbounded.
    pub fn memory_pressure(&self) -> f64 {
        if self.max_memory == 0 {
            0.0
        } else {
            self.used_memory as f64 / self.max_memory as f64
        }
    }

    /// Server-side hit rate from the keyspace counters.
    pub fn keyspace_hit_rate(&self) -> f64 {
        let total = self.keyspace_hits + self.keyspace_misses;
        if total == 0 {
            0.0
        } else {
            self.keyspace_hits as f64 / total as f64
        }
    }
}
