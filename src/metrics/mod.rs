//! Metrics Module
//!
//! Event-driven cache metrics: rolling snapshots, hot keys, slow operations
//! and a derived health score.

mod aggregator;
mod health;
mod hot_keys;
mod slow_ops;
mod snapshot;

pub use aggregator::{KeyErrorStats, MetricsAggregator, PerformanceReport};
pub use health::{health_score, HealthGrade, HealthScore};
pub use hot_keys::{HotKey, HotKeyTracker};
pub use slow_ops::{SlowOperation, SlowOperationLog};
pub use snapshot::MetricsSnapshot;
