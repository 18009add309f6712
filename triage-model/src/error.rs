use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(
        "checkpoint dimension mismatch for {tensor}: expected {expected:?}, found {found:?}"
    )]
    DimensionMismatch {
        tensor: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("checkpoint is missing tensor {0}")]
    MissingTensor(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
