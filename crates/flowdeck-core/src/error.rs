//! Error taxonomy for workflow persistence and scheduling.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Every failure a Flowdeck component can surface.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed workflow definition or schedule, rejected at save time.
    #[error("{0}")]
    Validation(String),

    /// The referenced workflow does not exist.
    #[error("Workflow not found: {0}")]
    NotFound(String),

    /// The executor reported that the workflow itself failed.
    #[error("Workflow execution failed: {0}")]
    Executor(String),

    /// The backing store cannot be reached.
    #[error("Workflow store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable category string used in structured error responses.
    pub fn category(&self) -> &'static str {
        match self {
            FlowError::Validation(_) => "validation",
            FlowError::NotFound(_) => "not_found",
            FlowError::Executor(_) => "executor_failure",
            FlowError::StoreUnavailable(_) | FlowError::Io(_) => "store_unavailable",
            FlowError::Config(_) => "config",
            FlowError::Serialization(_) => "serialization",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::NotFound(_))
    }
}
