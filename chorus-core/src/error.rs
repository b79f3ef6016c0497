//! Error types for the chorus core library.

use thiserror::Error;

/// Top-level error type for all chorus core operations.
#[derive(Error, Debug)]
pub enum ChorusError {
    /// A persona with the given name is not part of the world.
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChorusError>;
