//! Metrics Snapshot Module
//!
//! Rolling counters for hits, misses, writes, deletes and errors.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheEvent, CacheEventKind};

// == Metrics Snapshot ==
/// Counters derived from cache events. Approximate; the store is the
/// source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Reads that found a value
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Failed operations of any kind
    pub errors: u64,
    pub total_execution_time_ms: f64,
    pub average_execution_time_ms: f64,
    pub hit_rate: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    // == Constructor ==
    /// Creates a snapshot with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record ==
    /// Folds one event into the counters and recomputes the derived fields.
    pub fn record(&mut self, event: &CacheEvent) {
        match event.kind {
            CacheEventKind::Hit => self.hits += 1,
            CacheEventKind::Miss => self.misses += 1,
            CacheEventKind::Set => self.sets += 1,
            CacheEventKind::Delete => self.deletes += 1,
            CacheEventKind::Error => self.errors += 1,
        }
        self.total_execution_time_ms += event.duration_ms.max(0.0);
        self.average_execution_time_ms = self.total_execution_time_ms / self.operations() as f64;
        self.hit_rate = self.compute_hit_rate();
        self.last_updated = Some(event.timestamp);
    }

    /// Number of recorded events.
    pub fn operations(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes + self.errors
    }

    /// Number of reads.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn compute_hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }

    /// Returns errors / max(1, hits + misses).
    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.lookups().max(1) as f64
    }
}
