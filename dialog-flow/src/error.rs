use thiserror::Error;

/// Errors surfaced by flow execution and session storage.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("context error: {0}")]
    Context(String),

    #[error("step execution failed: {0}")]
    StepFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
