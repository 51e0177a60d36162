//! Metrics Aggregator
//!
//! Consumes engine events off the bus and keeps global and per-type
//! snapshots, hot keys, slow operations and per-key error counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{HealthScore, HotKey, HotKeyTracker, MetricsSnapshot, SlowOperation, SlowOperationLog};
use crate::cache::{BusStats, CacheEvent, CacheEventKind, EngineEvent, EventBus, KeyBuilder};
use crate::config::MonitoringConfig;
use crate::tasks::CleanupReport;

/// Entries per list in a performance report.
const REPORT_LIMIT: usize = 10;

const LOW_HIT_RATE: f64 = 0.8;
const SLOW_AVERAGE_MS: f64 = 100.0;
const HIGH_ERROR_RATE: f64 = 0.05;

/// Failure history for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyErrorStats {
    pub key: String,
    pub count: u64,
    pub last_error: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub snapshot: MetricsSnapshot,
    pub per_type: BTreeMap<String, MetricsSnapshot>,
    pub health: HealthScore,
    pub hot_keys: Vec<HotKey>,
    pub slow_operations: Vec<SlowOperation>,
    pub error_keys: Vec<KeyErrorStats>,
    pub last_cleanup: Option<CleanupReport>,
    pub events: BusStats,
    pub sampled_out: u64,
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
struct MetricsState {
    global: MetricsSnapshot,
    per_type: BTreeMap<String, MetricsSnapshot>,
    hot_keys: HotKeyTracker,
    slow_ops: SlowOperationLog,
    key_errors: HashMap<String, KeyErrorStats>,
    last_cleanup: Option<CleanupReport>,
    sampled_out: u64,
}

impl MetricsState {
    fn new(config: &MonitoringConfig) -> Self {
        Self {
            global: MetricsSnapshot::new(),
            per_type: BTreeMap::new(),
            hot_keys: HotKeyTracker::new(config.hot_key_limit),
            slow_ops: SlowOperationLog::new(config.slow_log_capacity, config.slow_threshold_ms),
            key_errors: HashMap::new(),
            last_cleanup: None,
            sampled_out: 0,
        }
    }
}

// == Metrics Aggregator ==
#[derive(Debug)]
pub struct MetricsAggregator {
    config: MonitoringConfig,
    events: Arc<EventBus>,
    state: Mutex<MetricsState>,
}

impl MetricsAggregator {
    pub fn new(config: MonitoringConfig, events: Arc<EventBus>) -> Self {
        let state = Mutex::new(MetricsState::new(&config));
        Self {
            config,
            events,
            state,
        }
    }

    /// Subscribes to the bus and folds every event in on a background task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let rx = self.events.subscribe();
        let aggregator = Arc::clone(self);
        tokio::spawn(async move { aggregator.consume(rx).await })
    }

    async fn consume(&self, mut rx: mpsc::Receiver<EngineEvent>) {
        info!(
            enabled = self.config.enabled,
            sample_rate = self.config.sample_rate,
            "Metrics aggregator started"
        );
        while let Some(event) = rx.recv().await {
            self.ingest(&event);
        }
        debug!("Event bus closed, metrics aggregator stopping");
    }

    /// Folds one event into the state. Cache events are sampled at the
    /// configured rate, the same for every kind.
    pub fn ingest(&self, event: &EngineEvent) {
        match event {
            EngineEvent::CleanupCompleted(report) => {
                self.state.lock().last_cleanup = Some(report.clone());
            }
            EngineEvent::Cache(event) => {
                if !self.config.enabled {
                    return;
                }
                if self.config.sample_rate < 1.0 && rand::random::<f64>() >= self.config.sample_rate {
                    self.state.lock().sampled_out += 1;
                    return;
                }
                self.record(event);
            }
        }
    }

    fn record(&self, event: &CacheEvent) {
        let mut state = self.state.lock();
        state.global.record(event);

        if let Some(cache_type) = KeyBuilder::type_segment(&event.key) {
            state
                .per_type
                .entry(cache_type.to_string())
                .or_default()
                .record(event);
        }

        if matches!(event.kind, CacheEventKind::Hit | CacheEventKind::Miss) {
            state.hot_keys.record(&event.key, event.timestamp);
        }

        state.slow_ops.record(event);

        if event.kind == CacheEventKind::Error {
            let limit = self.config.error_key_limit;
            record_key_error(&mut state.key_errors, event, limit);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().global.clone()
    }

    pub fn type_snapshot(&self, cache_type: &str) -> Option<MetricsSnapshot> {
        self.state.lock().per_type.get(cache_type).cloned()
    }

    pub fn type_snapshots(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.state.lock().per_type.clone()
    }

    pub fn health(&self) -> HealthScore {
        HealthScore::from_snapshot(&self.state.lock().global)
    }

    pub fn last_cleanup(&self) -> Option<CleanupReport> {
        self.state.lock().last_cleanup.clone()
    }

    pub fn hot_keys(&self, n: usize) -> Vec<HotKey> {
        self.state.lock().hot_keys.top(n)
    }

    pub fn report(&self) -> PerformanceReport {
        let events = self.events.stats();
        let state = self.state.lock();

        let mut error_keys: Vec<KeyErrorStats> = state.key_errors.values().cloned().collect();
        error_keys.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        error_keys.truncate(REPORT_LIMIT);

        let health = HealthScore::from_snapshot(&state.global);
        let recommendations = recommendations(&state.global, &events);

        PerformanceReport {
            generated_at: Utc::now(),
            snapshot: state.global.clone(),
            per_type: state.per_type.clone(),
            health,
            hot_keys: state.hot_keys.top(REPORT_LIMIT),
            slow_operations: state.slow_ops.slowest(REPORT_LIMIT),
            error_keys,
            last_cleanup: state.last_cleanup.clone(),
            events,
            sampled_out: state.sampled_out,
            recommendations,
        }
    }

    /// Drops every counter. The last cleanup report is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let last_cleanup = state.last_cleanup.take();
        *state = MetricsState::new(&self.config);
        state.last_cleanup = last_cleanup;
        info!("Metrics reset");
    }
}

fn record_key_error(errors: &mut HashMap<String, KeyErrorStats>, event: &CacheEvent, limit: usize) {
    if let Some(stats) = errors.get_mut(&event.key) {
        stats.count += 1;
        stats.last_error = event.error.clone();
        stats.last_seen = event.timestamp;
        return;
    }

    if errors.len() >= limit.max(1) {
        let stalest = errors
            .values()
            .min_by_key(|stats| stats.last_seen)
            .map(|stats| stats.key.clone());
        if let Some(key) = stalest {
            errors.remove(&key);
        }
    }

    errors.insert(
        event.key.clone(),
        KeyErrorStats {
            key: event.key.clone(),
            count: 1,
            last_error: event.error.clone(),
            last_seen: event.timestamp,
        },
    );
}

fn recommendations(snapshot: &MetricsSnapshot, events: &BusStats) -> Vec<String> {
    let mut out = Vec::new();

    if snapshot.lookups() > 0 && snapshot.compute_hit_rate() < LOW_HIT_RATE {
        out.push(format!(
            "Hit rate is {:.1}%; consider longer TTLs or warming frequently read types",
            snapshot.compute_hit_rate() * 100.0
        ));
    }
    if snapshot.average_execution_time_ms > SLOW_AVERAGE_MS {
        out.push(format!(
            "Average operation takes {:.1} ms; check store latency and payload sizes",
            snapshot.average_execution_time_ms
        ));
    }
    if snapshot.errors > 0 && snapshot.error_rate() > HIGH_ERROR_RATE {
        out.push(format!(
            "Error rate is {:.1}%; check store connectivity",
            snapshot.error_rate() * 100.0
        ));
    }
    if events.dropped > 0 {
        out.push(format!(
            "{} events were dropped; raise the event buffer or lower the sample rate",
            events.dropped
        ));
    }

    out
}
