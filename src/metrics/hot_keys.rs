//! Hot Key Tracking
//!
//! Bounded access counts per key, pruned back to the top N whenever the map
//! grows past 2N.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotKey {
    pub key: String,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AccessRecord {
    count: u64,
    last_accessed: DateTime<Utc>,
}

// == Hot Key Tracker ==
#[derive(Debug, Clone)]
pub struct HotKeyTracker {
    limit: usize,
    keys: HashMap<String, AccessRecord>,
}

impl HotKeyTracker {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            keys: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Counts one access to `key`.
    pub fn record(&mut self, key: &str, at: DateTime<Utc>) {
        match self.keys.get_mut(key) {
            Some(record) => {
                record.count += 1;
                record.last_accessed = at;
            }
            None => {
                self.keys.insert(
                    key.to_string(),
                    AccessRecord {
                        count: 1,
                        last_accessed: at,
                    },
                );
            }
        }

        if self.keys.len() > self.limit * 2 {
            self.prune();
        }
    }

    /// The `n` most accessed keys, busiest first.
    pub fn top(&self, n: usize) -> Vec<HotKey> {
        let mut ranked: Vec<HotKey> = self
            .keys
            .iter()
            .map(|(key, record)| HotKey {
                key: key.clone(),
                access_count: record.count,
                last_accessed: record.last_accessed,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        ranked.truncate(n);
        ranked
    }

    fn prune(&mut self) {
        let keep: Vec<String> = self.top(self.limit).into_iter().map(|hot| hot.key).collect();
        self.keys.retain(|key, _| keep.contains(key));
    }
}
