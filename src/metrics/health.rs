//! Health Score
//!
//! A 0..=100 score derived from hit rate, average latency and error rate.

use serde::Serialize;

use super::MetricsSnapshot;

const HIT_RATE_WEIGHT: f64 = 0.5;
const LATENCY_WEIGHT: f64 = 0.3;
const ERROR_WEIGHT: f64 = 0.2;

/// Bucketed health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthGrade::Excellent
        } else if score >= 75.0 {
            HealthGrade::Good
        } else if score >= 60.0 {
            HealthGrade::Fair
        } else {
            HealthGrade::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    pub score: f64,
    pub grade: HealthGrade,
    pub hit_rate: f64,
    pub average_execution_time_ms: f64,
    pub error_rate: f64,
}

impl HealthScore {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let score = health_score(snapshot);
        Self {
            score,
            grade: HealthGrade::from_score(score),
            hit_rate: snapshot.compute_hit_rate(),
            average_execution_time_ms: snapshot.average_execution_time_ms,
            error_rate: snapshot.error_rate(),
        }
    }
}

/// Pure function of the snapshot's counters.
pub fn health_score(snapshot: &MetricsSnapshot) -> f64 {
    let hit_component = snapshot.compute_hit_rate() * 100.0;
    let latency_component = (100.0 - snapshot.average_execution_time_ms / 10.0).max(0.0);
    let error_component = (100.0 - snapshot.error_rate() * 100.0).max(0.0);

    HIT_RATE_WEIGHT * hit_component
        + LATENCY_WEIGHT * latency_component
        + ERROR_WEIGHT * error_component
}
