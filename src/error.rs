/// Adapter-wide error type.
///
/// Errors fall into four groups:
/// - validation errors raised before any network I/O (`InvalidRequest`),
/// - categorized upstream HTTP failures (`Auth`, `NotFound`, `RateLimited`,
///   `Upstream`),
/// - transport and protocol failures observed mid-stream,
/// - cooperative cancellation, which is an outcome rather than a failure and
///   must stay distinguishable from every other variant.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Authentication failed: status={status}, body={body}")]
    Auth { status: u16, body: String },
    #[error("Endpoint not found: {body}")]
    NotFound { body: String },
    #[error("Rate limited or blocked: {body}")]
    RateLimited { body: String },
    #[error("Upstream error: status={status}, body={body}")]
    Upstream { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol violation: {0}")]
    Protocol(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Map a non-2xx upstream HTTP status and its body text to a
    /// categorized error.
    #[must_use]
    pub fn from_upstream_status(status: http::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => AdapterError::Auth {
                status: status.as_u16(),
                body,
            },
            404 => AdapterError::NotFound { body },
            429 => AdapterError::RateLimited { body },
            s => AdapterError::Upstream { status: s, body },
        }
    }

    /// True when this outcome represents user-triggered cancellation rather
    /// than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AdapterError::Cancelled)
    }
}
