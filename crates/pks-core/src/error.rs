//! Error types for pks-core.

use thiserror::Error;

/// Result type alias using pks-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for pattern store operations
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bundle signature mismatch (expected {expected}, got {actual})")]
    Integrity { expected: String, actual: String },

    #[error("Pattern not found: {0}")]
    NotFound(String),

    #[error("Pattern already exists: {0}")]
    AlreadyExists(String),

    #[error("Pattern is protected: {0}")]
    Protected(String),

    // Maintenance errors
    #[error("Maintenance job already running: {running}")]
    MaintenanceBusy { running: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an integrity error from the two signatures
    pub fn integrity(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Integrity {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error came from the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::LockPoisoned | Self::Io(_))
    }
}
