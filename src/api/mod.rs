//! API Module
//!
//! HTTP handlers and routing for the cache admin API.
//!
//! # Endpoints
//! - `GET /health`, `GET /stats`
//! - `GET /metrics/report`, `GET /metrics/health-score`, `POST /metrics/reset`
//! - `POST /cache/clear`, `POST /cache/clear-all`, `POST /cache/cleanup`
//! - `GET /types`, `PUT /types/:cache_type`

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
