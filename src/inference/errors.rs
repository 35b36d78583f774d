//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries and to classify the failure for retry decisions.

use thiserror::Error;

/// Errors that can occur while opening or consuming a streaming completion.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the completion endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the completion endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The stream delivered an in-band `error` event.
    #[error("{error_type}: {message}")]
    ApiError { error_type: String, message: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The stream stopped because its cancellation token fired.
    #[error("stream aborted")]
    Aborted,

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// The HTTP status this failure carries, if any.
    ///
    /// In-band stream errors have no HTTP status of their own; the well-known
    /// error types are mapped onto the status the endpoint would have used.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            InferenceError::ApiError { error_type, .. } => match error_type.as_str() {
                "overloaded_error" => Some(529),
                "rate_limit_error" => Some(429),
                "api_error" => Some(500),
                "authentication_error" => Some(401),
                "permission_error" => Some(403),
                "invalid_request_error" => Some(400),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether this is the distinguishable failure produced by a honored abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, InferenceError::Aborted)
    }

    /// The remote's own error text: the body of an `HttpError` or the
    /// message of an in-band `ApiError`. `None` for local failures.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            InferenceError::ApiError { message, .. } => Some(message),
            _ => None,
        }
    }
}
