//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its admin surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Network or connection failure talking to the backing store
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call exceeded its command or connect timeout
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// Payload could not be encoded, decoded or decompressed
    #[error("Serialization failure: {0}")]
    Serialization(String),

    /// A cache type or engine setting failed validation
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The stampede lock for a key is held by another caller
    #[error("Lock contention on {0}")]
    LockContention(String),

    /// No cache type registered under this name
    #[error("Unknown cache type: {0}")]
    UnknownType(String),

    /// Invalid admin request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidRequest(_)
            | CacheError::ConfigurationInvalid(_)
            | CacheError::UnknownType(_) => StatusCode::BAD_REQUEST,
            CacheError::StoreUnavailable(_) | CacheError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::LockContention(_) => StatusCode::CONFLICT,
            CacheError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
