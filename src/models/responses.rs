//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies that are not
//! already admin result types.

use serde::Serialize;

use crate::cache::CacheTypeConfig;

/// Response body for the clear endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Success message
    pub message: String,
    /// Number of keys deleted
    pub removed: u64,
}

impl ClearResponse {
    pub fn new(removed: u64) -> Self {
        Self {
            message: format!("Cleared {} keys", removed),
            removed,
        }
    }
}

/// Response body for POST /metrics/reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
    /// When the counters were reset, ISO 8601
    pub timestamp: String,
}

impl ResetResponse {
    pub fn now() -> Self {
        Self {
            message: "Metrics reset".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for GET /types
#[derive(Debug, Clone, Serialize)]
pub struct TypesResponse {
    pub count: usize,
    pub types: Vec<CacheTypeConfig>,
}

impl TypesResponse {
    pub fn new(types: Vec<CacheTypeConfig>) -> Self {
        Self {
            count: types.len(),
            types,
        }
    }
}
