//! Blog Cache - tag-aware caching and invalidation for the blog backend
//!
//! Typed cache types over a Redis-class store, with compression, tag-based
//! invalidation, stampede-protected read-through, memory-pressure cleanup
//! and event-driven metrics.

pub mod admin;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod store;
pub mod tasks;

pub use admin::CacheAdmin;
pub use api::AppState;
pub use cache::{CacheAside, CacheEngine};
pub use config::Config;
pub use error::{CacheError, Result};
