//! Error types for the hands-on runtime domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Session memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Deadlines ---
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable category, used in response error descriptors.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Provider(_) => "provider",
            Error::Memory(_) => "memory",
            Error::Tool(_) => "tool",
            Error::Config { .. } => "config",
            Error::Timeout { .. } => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid session identity: {0}")]
    InvalidSession(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Remote service {service} failed: {message}")]
    Remote { service: String, message: String },

    #[error("Missing configuration: {0}")]
    NotConfigured(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Shorthand for a failure reported by a remote platform service.
    pub fn remote(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ToolError::Remote {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
        assert_eq!(err.kind(), "provider");
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::remote("code-interpreter", "session quota exceeded"));
        assert!(err.to_string().contains("code-interpreter"));
        assert!(err.to_string().contains("quota"));
        assert_eq!(err.kind(), "tool");
    }

    #[test]
    fn timeout_error_names_operation() {
        let err = Error::Timeout {
            operation: "invocation".into(),
            timeout_secs: 30,
        };
        assert_eq!(err.to_string(), "invocation timed out after 30s");
        assert_eq!(err.kind(), "timeout");
    }
}
