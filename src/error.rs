//! Error types for reverie-memory

use thiserror::Error;

/// Result type alias for reverie-memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reverie-memory
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Synthesis provider unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Synthesis output could not be parsed: {0}")]
    SynthesisParse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn embedding_unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    pub fn synthesis_unavailable(msg: impl Into<String>) -> Self {
        Self::SynthesisUnavailable(msg.into())
    }

    pub fn synthesis_parse(msg: impl Into<String>) -> Self {
        Self::SynthesisParse(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
