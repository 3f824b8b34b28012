//! Error types for mcprun
//!
//! Centralized error handling using thiserror. Whether an error aborts a run
//! or is fed back to the model is decided by [`RunError::is_recoverable`].

use thiserror::Error;

/// All error types that can occur while running an agent against tool servers
#[derive(Debug, Error)]
pub enum RunError {
    /// A tool server could not be launched or never signalled readiness
    #[error("Launch error for server '{server}': {message}")]
    Launch { server: String, message: String },

    /// Two servers (or one server twice) expose the same tool name
    #[error("Duplicate tool '{tool}' exposed by servers '{first}' and '{second}'")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    /// The model asked for a tool that no server exposes
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Protocol-level fault talking to a tool server
    #[error("Invocation error on server '{server}': {message}")]
    Invocation { server: String, message: String },

    /// The model backend could not be reached after retries
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// The run was cancelled before the turn loop began
    #[error("Cancelled")]
    Cancelled,
}

impl RunError {
    pub fn launch(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Launch {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn invocation(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Errors the model can recover from when they are reported back as a tool result
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RunError::UnknownTool(_))
    }
}

/// Result type alias for mcprun operations
pub type Result<T> = std::result::Result<T, RunError>;
