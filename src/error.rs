//! @ai:module:intent Error taxonomy for benchmark execution
//! @ai:module:layer domain
//! @ai:module:public_api BenchError, Result
//! @ai:module:stateless true

use thiserror::Error;

/// @ai:intent Unified error type for all engine operations
#[derive(Error, Debug)]
pub enum BenchError {
    /// Rejected before any record is created.
    #[error("Invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    #[error("OpenRouter API error: {status} - {body}")]
    Provider { status: u16, body: String },

    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed provider payload: {0}")]
    Decode(String),

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A guarded write found the response already terminal or gone.
    #[error("Response {0} is no longer active")]
    Inactive(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl BenchError {
    /// @ai:intent True for failures caused by the caller's input
    /// @ai:effects pure
    pub fn is_setup_error(&self) -> bool {
        matches!(self, BenchError::InvalidConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
