//! Response envelopes: a success wrapper and RFC 7807 problem details.

use serde::{Deserialize, Serialize};

/// Success envelope for administration endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok(data)
        }
    }
}

/// Problem type of a request rejected by the limiter.
pub const RATE_LIMITED_TYPE: &str = "urn:bulwark:problem:rate-limited";
/// Problem type of a request that no counter backend could decide.
pub const BACKENDS_UNAVAILABLE_TYPE: &str = "urn:bulwark:problem:backends-unavailable";

/// RFC 7807 Problem Details.
///
/// See: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Module whose policy produced the rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Seconds until the client may retry; mirrors the `Retry-After` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            error_type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
            module: None,
            retry_after: None,
        }
    }

    fn typed(mut self, error_type: &str) -> Self {
        self.error_type = error_type.to_string();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, "Bad Request").with_detail(detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(404, "Not Found").with_detail(detail)
    }

    pub fn too_many_requests(module: &str) -> Self {
        let mut problem = Self::new(429, "Too Many Requests")
            .typed(RATE_LIMITED_TYPE)
            .with_detail(format!("Rate limit exceeded for '{module}'"));
        problem.module = Some(module.to_string());
        problem
    }

    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(503, "Service Unavailable")
            .typed(BACKENDS_UNAVAILABLE_TYPE)
            .with_detail(detail)
    }
}
