//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Request body for POST /cache/clear
///
/// Every listed tag, pattern and type is cleared. Patterns are relative to
/// the global key prefix (`article:*` clears `blog:article:*`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

impl ClearRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.tags.is_empty() && self.patterns.is_empty() && self.types.is_empty() {
            return Some("Specify at least one tag, pattern or type to clear".to_string());
        }
        if self.patterns.iter().any(|p| p.trim().is_empty()) {
            return Some("Patterns cannot be empty".to_string());
        }
        None
    }
}

/// Request body for POST /cache/clear-all
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearAllRequest {
    #[serde(default)]
    pub confirm: bool,
}
