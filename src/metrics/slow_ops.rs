//! Slow Operation Log
//!
//! Ring of the most recent operations slower than a threshold.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheEvent, CacheEventKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowOperation {
    pub key: String,
    pub kind: CacheEventKind,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

// == Slow Operation Log ==
#[derive(Debug, Clone)]
pub struct SlowOperationLog {
    capacity: usize,
    threshold_ms: f64,
    entries: VecDeque<SlowOperation>,
}

impl SlowOperationLog {
    pub fn new(capacity: usize, threshold_ms: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            threshold_ms,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keeps `event` if it ran longer than the threshold. Returns whether it was kept.
    pub fn record(&mut self, event: &CacheEvent) -> bool {
        if event.duration_ms <= self.threshold_ms {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SlowOperation {
            key: event.key.clone(),
            kind: event.kind,
            duration_ms: event.duration_ms,
            timestamp: event.timestamp,
        });
        true
    }

    /// Up to `n` logged operations, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<SlowOperation> {
        let mut sorted: Vec<SlowOperation> = self.entries.iter().cloned().collect();
        sorted.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        sorted.truncate(n);
        sorted
    }
}
