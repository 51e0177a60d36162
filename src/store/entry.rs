//! Stored Entry Module
//!
//! A single value held by the memory store, with TTL and access tracking.

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed per-entry bookkeeping cost reported by `MEMORY USAGE`.
pub const ENTRY_OVERHEAD_BYTES: u64 = 48;

// == Stored Entry ==
/// Represents one key's value and metadata inside the memory store.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Raw stored bytes
    pub value: Vec<u8>,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Last read or write (Unix milliseconds)
    pub last_accessed: u64,
}

impl StoredEntry {
    // == Constructor ==
    /// Creates a new entry with an optional TTL in milliseconds.
    pub fn new(value: Vec<u8>, ttl_ms: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            expires_at: ttl_ms.map(|ttl| now + ttl),
            last_accessed: now,
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    /// Marks the entry as read.
    pub fn touch(&mut self) {
        self.last_accessed = current_timestamp_ms();
    }

    // == Time To Live ==
    /// Remaining TTL in milliseconds; `Some(0)` once expired, `None` without expiry.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    /// Seconds since the last access, the way `OBJECT IDLETIME` reports it.
    pub fn idle_secs(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.last_accessed) / 1000
    }

    /// Approximate footprint of the entry under `key`.
    pub fn footprint(&self, key: &str) -> u64 {
        key.len() as u64 + self.value.len() as u64 + ENTRY_OVERHEAD_BYTES
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
