use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response shared by every endpoint.
/// Carries enough context for a browser or script to show the problem and
/// decide whether resending makes sense.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Always "error"; browser clients branch on `status` like on success bodies
    pub status: String,
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

impl ApiError {
    pub fn new(error: &str, message: impl Into<String>, request_id: String) -> Self {
        Self {
            status: "error".to_string(),
            error: error.to_string(),
            message: message.into(),
            field: None,
            received: None,
            request_id,
            docs_hint: None,
        }
    }
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const UPSTREAM_TIMEOUT: &str = "upstream_timeout";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}
