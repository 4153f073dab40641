//! Error types for the Miharu bot

use thiserror::Error;

/// Main error type for Miharu operations
#[derive(Debug, Error)]
pub enum MiharuError {
    /// Configuration error (missing/invalid environment value or persona file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Voice channel connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Dialogue generation (LLM) error
    #[error("Generation error: {0}")]
    Generation(String),

    /// Speech synthesis (TTS) error
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Discord gateway/API error
    #[error("Discord error: {0}")]
    Discord(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Convenient Result type using MiharuError
pub type Result<T> = std::result::Result<T, MiharuError>;

impl MiharuError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        MiharuError::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        MiharuError::Connection(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        MiharuError::Generation(msg.into())
    }

    /// Create a synthesis error
    pub fn synthesis(msg: impl Into<String>) -> Self {
        MiharuError::Synthesis(msg.into())
    }

    /// Create a Discord error
    pub fn discord(msg: impl Into<String>) -> Self {
        MiharuError::Discord(msg.into())
    }

    /// Whether this error should abort startup rather than be skipped over
    pub fn is_fatal(&self) -> bool {
        matches!(self, MiharuError::Config(_))
    }
}
