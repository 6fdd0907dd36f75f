use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Refract proxy
#[derive(Error, Debug)]
pub enum RefractError {
    // Target resolution errors
    #[error("No target URL provided")]
    MissingTarget,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    // Upstream errors
    #[error("Upstream request timed out for {url}")]
    UpstreamTimeout { url: String },

    #[error("Upstream request failed for {url}: {message}")]
    UpstreamNetwork { url: String, message: String },

    // Rewrite errors
    #[error("Rewrite failed: {0}")]
    RewriteFailed(String),

    // Rate limiting
    #[error("Rate limit exceeded for {client_ip}")]
    RateLimitExceeded { client_ip: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Refract operations
pub type Result<T> = std::result::Result<T, RefractError>;

impl RefractError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RefractError::MissingTarget
            | RefractError::InvalidTarget(_)
            | RefractError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            RefractError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            RefractError::UpstreamTimeout { .. }
            | RefractError::UpstreamNetwork { .. }
            | RefractError::RewriteFailed(_)
            | RefractError::Io(_)
            | RefractError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used for `X-Proxy-Error` and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            RefractError::MissingTarget => "missing-target",
            RefractError::InvalidTarget(_) => "invalid-target",
            RefractError::UpstreamTimeout { .. } => "upstream-timeout",
            RefractError::UpstreamNetwork { .. } => "upstream-network",
            RefractError::RewriteFailed(_) => "rewrite-failed",
            RefractError::RateLimitExceeded { .. } => "rate-limited",
            RefractError::InvalidConfig(_) => "invalid-config",
            RefractError::Io(_) => "io",
            RefractError::Internal(_) => "internal",
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// JSON fallback for surfaces that don't render the HTML diagnostic page
// (the proxy pipeline renders its own; see proxy::diagnostics).
impl IntoResponse for RefractError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        (status, Json(body)).into_response()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RefractError {
    fn from(err: url::ParseError) -> Self {
        RefractError::InvalidTarget(err.to_string())
    }
}
