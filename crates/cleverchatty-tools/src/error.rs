use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("tool not found: {name}")]
    NotFound { name: String },

    #[error("invalid tool name '{name}': expected server__tool")]
    InvalidName { name: String },

    #[error("server '{server}' startup failed: {reason}")]
    Init { server: String, reason: String },

    #[error("call to {server}::{tool} failed: {reason}")]
    CallFailed {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] cleverchatty_core::error::CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolsError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolsError::NotFound { .. } => "TOOL_NOT_FOUND",
            ToolsError::InvalidName { .. } => "TOOL_INVALID_NAME",
            ToolsError::Init { .. } => "SERVER_INIT_FAILED",
            ToolsError::CallFailed { .. } => "TOOL_CALL_FAILED",
            ToolsError::Transport(_) => "TRANSPORT_ERROR",
            ToolsError::Timeout { .. } => "TIMEOUT",
            ToolsError::Cancelled => "CANCELLED",
            ToolsError::Core(e) => e.code(),
            ToolsError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolsError>;
