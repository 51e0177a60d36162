//! Event Bus Module
//!
//! Fire-and-forget publish/subscribe for cache lifecycle events. Each
//! subscriber owns a bounded channel; a full channel drops the event and
//! counts it instead of slowing down the publisher.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::tasks::CleanupReport;

// == Event Kinds ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

impl CacheEventKind {
    /// Topic name the event is published under.
    pub fn topic(&self) -> &'static str {
        match self {
            CacheEventKind::Hit => "cache.hit",
            CacheEventKind::Miss => "cache.miss",
            CacheEventKind::Set => "cache.set",
            CacheEventKind::Delete => "cache.delete",
            CacheEventKind::Error => "cache.error",
        }
    }
}

/// One cache operation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub key: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, key: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            kind,
            key: key.into(),
            duration_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Anything published on the bus.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Cache(CacheEvent),
    CleanupCompleted(CleanupReport),
}

impl EngineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::Cache(event) => event.kind.topic(),
            EngineEvent::CleanupCompleted(_) => "cache.cleanup.completed",
        }
    }
}

/// Publish counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

// == Event Bus ==
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    subscribers: RwLock<Vec<mpsc::Sender<EngineEvent>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    /// Creates a bus whose subscriber channels hold `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().push(tx);
        rx
    }

    /// Delivers `event` to every subscriber without waiting.
    pub fn publish(&self, event: EngineEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut saw_closed = false;

        for tx in self.subscribers.read().iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => saw_closed = true,
            }
        }

        if saw_closed {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|tx| !tx.is_closed());
            debug!(remaining = subscribers.len(), "Pruned closed event subscribers");
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: self.subscribers.read().len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}
