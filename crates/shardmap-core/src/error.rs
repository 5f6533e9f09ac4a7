//! Error types for shardmap configuration.

use thiserror::Error;

/// A specialized `Result` type for shardmap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or checking configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration parsed but describes an impossible cluster.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
