//! Error types for the Kestrel domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Kestrel operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Graph errors ---
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures inside a generation backend.
///
/// These never cross the [`Backend`](crate::backend::Backend) boundary as
/// errors; implementations render them into the diagnostic sentinel.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not served: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend unusable: {0}")]
    Unusable(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph persistence failed at {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("Graph document is malformed: {0}")]
    Malformed(String),

    #[error("Summarizer failed: {0}")]
    Summarizer(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = Error::Backend(BackendError::ApiError {
            status_code: 503,
            message: "model loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model loading"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "code_runner".into(),
            reason: "path escapes workspace".into(),
        });
        assert!(err.to_string().contains("code_runner"));
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn graph_error_carries_path() {
        let err = Error::Graph(GraphError::Persistence {
            path: "/tmp/graph.json".into(),
            reason: "disk full".into(),
        });
        assert!(err.to_string().contains("/tmp/graph.json"));
    }
}
