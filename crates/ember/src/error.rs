//! Error types for Ember

use thiserror::Error;

use crate::extraction::ExtractorError;
use crate::memory::session::SessionIdError;

/// Main error type for Ember operations
#[derive(Error, Debug)]
pub enum EmberError {
    /// The embedding provider failed or timed out. Never masked as an empty result.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The extraction collaborator kept failing after all retries
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// A candidate returned by the extraction collaborator could not be validated
    #[error("Malformed candidate: {0}")]
    MalformedCandidate(String),

    /// A write kept hitting lock contention after bounded retries
    #[error("Store write conflict after {attempts} attempts: {message}")]
    StoreWriteConflict { attempts: u32, message: String },

    /// An extraction commit targeted turns that were already processed
    #[error("Stale batch: {0}")]
    StaleBatch(String),

    /// Storage-related errors (SQLite, migrations, row decoding)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown or invalid session
    #[error("Session error: {0}")]
    Session(#[from] SessionIdError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for EmberError {
    fn from(e: sqlx::Error) -> Self {
        EmberError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for EmberError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        EmberError::Storage(format!("migration failed: {e}"))
    }
}

impl From<ExtractorError> for EmberError {
    fn from(e: ExtractorError) -> Self {
        match e {
            ExtractorError::ConfigError(msg) => EmberError::Config(msg),
            other => EmberError::ExtractionFailed(other.to_string()),
        }
    }
}

/// Result type alias for Ember operations
pub type Result<T> = std::result::Result<T, EmberError>;
