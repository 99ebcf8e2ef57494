//! Data Transfer Objects - request/response types for the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admission decision as returned to HTTP clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    /// Whole seconds until a block lifts, rounded up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Query of `DELETE /api/rate-limits/cache`. Omitted fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetCacheQuery {
    pub key: Option<String>,
    pub module: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetCacheResponse {
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConfigsResponse {
    pub modules: usize,
}

/// Query of `GET /api/rate-limits/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckQuery {
    pub key: String,
    pub module: String,
}
