//! Crate-wide error type.
//!
//! Covers the error kinds components surface (`validation`, `execution`,
//! `transport`, `cancelled`, `timeout`, `system`). Component modules keep
//! their own narrow error enums (`ThreadPathError` does not exist — thread-
//! path resolution never fails, it degrades gracefully — but
//! `DelegationError`, `StoreError`, `ToolSourceError`, `TransportError` do)
//! and convert into `EngineError` at the boundary where the error becomes
//! visible to the model or the caller.

use thiserror::Error;

/// Top-level error for the conversation/agent-execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad tool input, field-level.
    #[error("validation error on field `{field}`: {message}")]
    Validation { field: String, message: String },

    /// A tool failed at runtime.
    #[error("tool `{tool}` execution failed: {message}")]
    Execution {
        tool: String,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transport (publish/fetch) failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was cancelled by a superseding trigger.
    #[error("operation cancelled")]
    Cancelled,

    /// A timeout elapsed (delegation, tool execution).
    #[error("timed out: {0}")]
    Timeout(String),

    /// An internal invariant was violated.
    #[error("invariant violated: {0}")]
    System(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Execution {
            tool: tool.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// `true` for error kinds that are surfaced back to the model as a
    /// structured tool result rather than aborting the turn.
    pub fn is_tool_visible(&self) -> bool {
        matches!(self, EngineError::Validation { .. } | EngineError::Execution { .. })
    }
}
