//! Error types for the placetime fetcher.

use thiserror::Error;

/// Result type alias using the fetcher's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for fetcher operations.
///
/// Every variant is terminal for the job in which it occurs; nothing in the
/// job engine retries or converts between kinds.
#[derive(Error, Debug)]
pub enum Error {
    /// Network fetch failed (connection, timeout, non-success status)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Feed content could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// No usable image candidate was found
    #[error("No image: {0}")]
    NoImage(String),

    /// Image decode or encode failed
    #[error("Image error: {0}")]
    Image(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl Error {
    /// Short, stable name of the error kind for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Parse(_) => "parse",
            Error::NoImage(_) => "selection",
            Error::Image(_) => "image",
            Error::Io(_) => "io",
            Error::Database(_) => "datastore",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}
