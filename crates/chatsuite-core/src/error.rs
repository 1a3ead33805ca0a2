//! Error types for chatsuite-core

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No valid messages")]
    NoValidMessages,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{reason}")]
    InsufficientCredits { required: i64, reason: String },

    #[error("File too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_REQUEST",
            Error::NoValidMessages => "NO_VALID_MESSAGES",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Error::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Error::UnsupportedFileType(_) => "UNSUPPORTED_FILE_TYPE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Cancelled => "CANCELLED",
            Error::Database(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Provider(_)
            | Error::Extraction(_)
            | Error::Other(_) => "INTERNAL",
        }
    }
}

/// Result type alias using Error.
pub type Result<T> = std::result::Result<T, Error>;
