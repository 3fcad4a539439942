//! Error types for the holdings core library.

/// Top-level error enum for the holdings core library.
#[derive(Debug, thiserror::Error)]
pub enum HoldingsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Record {seq}: {message}")]
    Worker { seq: u64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HoldingsError {
    pub fn config(msg: impl Into<String>) -> Self {
        HoldingsError::Config(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        HoldingsError::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        HoldingsError::Encode(msg.into())
    }
}

pub type HoldingsResult<T> = Result<T, HoldingsError>;
