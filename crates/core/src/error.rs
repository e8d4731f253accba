//! Error types for the Taskloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Taskloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Context store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

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

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the on-disk context store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupted record at {path}: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("Context not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool '{tool_name}' timed out after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied for {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Tool '{0}' is not permitted for this agent")]
    NotPermitted(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures raised while orchestrating agents and subagents.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Maximum spawn depth ({max}) exceeded. Cannot spawn more subagents.")]
    SpawnDepthExceeded { max: u32 },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("working_dir does not exist or is not a directory: {0}")]
    InvalidWorkingDir(String),

    #[error("Invalid agent definition at {path}: {reason}")]
    InvalidDefinition { path: String, reason: String },
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
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "bash".into(),
            reason: "command matches a blocked pattern".into(),
        });
        assert!(err.to_string().contains("bash"));
        assert!(err.to_string().contains("blocked pattern"));
    }

    #[test]
    fn spawn_depth_message_names_the_limit() {
        let err = AgentError::SpawnDepthExceeded { max: 3 };
        assert_eq!(
            err.to_string(),
            "Maximum spawn depth (3) exceeded. Cannot spawn more subagents."
        );
    }

    #[test]
    fn not_permitted_mentions_tool() {
        let err = ToolError::NotPermitted("bash".into());
        assert!(err.to_string().contains("not permitted"));
        assert!(err.to_string().contains("bash"));
    }
}
