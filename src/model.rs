//! Core model types shared across the monitor, web, and notifier layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for a single monitored endpoint.
///
/// Identity is `id`, which is unique across the engine. Descriptors are
/// replaced wholesale on reconfiguration and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub url: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub expected_status: u16,
    pub expected_content: String,
    pub alert_threshold: u32,
    pub ignore_tls_error: bool,
    pub is_active: bool,
}

/// Classification of a completed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NG")]
    Ng,
}

/// The result of one health check against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(rename = "id")]
    pub target_id: String,
    #[serde(rename = "timestamp")]
    pub checked_at: DateTime<Utc>,
    pub status: Status,
    #[serde(rename = "response_time_ms")]
    pub latency_ms: u64,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

impl CheckResult {
    /// Create a successful result.
    pub fn success(target_id: &str, latency_ms: u64, http_status: u16) -> Self {
        Self {
            target_id: target_id.to_string(),
            checked_at: Utc::now(),
            status: Status::Ok,
            latency_ms,
            http_status: Some(http_status),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failure(
        target_id: &str,
        latency_ms: u64,
        http_status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            checked_at: Utc::now(),
            status: Status::Ng,
            latency_ms,
            http_status,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Status of a target as reported by the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CurrentStatus {
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NG")]
    Ng,
}

/// Point-in-time snapshot of one target, served by the REST layer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub current_status: CurrentStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub recent_errors_count: u32,
}
