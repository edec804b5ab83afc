use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-success status, unreadable body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A single bounded attempt ran out of time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The automation engine failed to render or read a page.
    #[error("Browser error: {0}")]
    Browser(String),

    /// A browser session could not be created for a source.
    #[error("Session error for '{source_key}': {message}")]
    Session { source_key: String, message: String },

    /// HTML could not be turned into text.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Feed or listing page could not be discovered/parsed.
    #[error("Feed error: {0}")]
    Feed(String),

    /// Extracted content was shorter than the configured minimum.
    #[error("Content too short: {length} chars (minimum {minimum})")]
    ContentTooShort { length: usize, minimum: usize },

    /// Every schedule entry of a retry policy failed.
    #[error("Gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: usize,
        last_error: Box<AppError>,
    },

    /// Every extraction tier failed for an item.
    #[error("All extraction tiers failed: {0}")]
    AllTiersFailed(String),

    /// Content cleaning failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Rate limit exceeded on a remote API.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Article storage rejected or failed to persist an item.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The operation was aborted by a cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::Browser(_) => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.contains("HTTP 5")
                    || msg.contains("HTTP 429")
            }
            _ => false,
        }
    }

    /// Returns true for soft failures that should only trigger a fallback.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            AppError::ContentTooShort { .. } | AppError::ParseError(_)
        )
    }

    /// Convenience constructor for [`AppError::Session`].
    pub fn session(source_key: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Session {
            source_key: source_key.into(),
            message: message.into(),
        }
    }
}
