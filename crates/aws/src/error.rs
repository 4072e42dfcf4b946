//! Errors raised while talking to the remote platform.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("AWS credentials unavailable: {0}")]
    MissingCredentials(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Access denied (status {status}): {body}")]
    AccessDenied { status: u16, body: String },

    #[error("Throttled by service: {0}")]
    Throttled(String),

    #[error("Service returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Malformed event stream: {0}")]
    EventStream(String),

    #[error("Service exception {kind}: {message}")]
    Exception { kind: String, message: String },
}

impl PlatformError {
    /// Map a transport failure from `reqwest`.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout(err.to_string())
        } else {
            PlatformError::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => PlatformError::AccessDenied { status, body },
            429 => PlatformError::Throttled(body),
            _ => PlatformError::Http { status, body },
        }
    }
}
