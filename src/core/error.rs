//! Error type system for mediasweep
//!
//! This module provides the crate-wide error type with:
//! - Hierarchical error classification
//! - Error context and chaining support
//! - Retry and cancellation classification used by the rule queue

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for the mediasweep engine
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Collaborator errors
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Companion service error: {0}")]
    CompanionError(String),

    #[error("Media server error: {0}")]
    MediaServerError(String),

    #[error("Rule evaluation error: {0}")]
    EvaluationError(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl SweepError {
    /// Get the error type name for logs and events
    pub fn error_type(&self) -> &'static str {
        match self {
            SweepError::InitializationError(_) => "InitializationError",
            SweepError::ConfigError(_) => "ConfigError",
            SweepError::DatabaseError(_) => "DatabaseError",
            SweepError::MigrationError(_) => "MigrationError",
            SweepError::NotFound(_) => "NotFound",
            SweepError::ValidationError(_) => "ValidationError",
            SweepError::NetworkError(_) => "NetworkError",
            SweepError::Timeout(_) => "Timeout",
            SweepError::CompanionError(_) => "CompanionError",
            SweepError::MediaServerError(_) => "MediaServerError",
            SweepError::EvaluationError(_) => "EvaluationError",
            SweepError::IoError(_) => "IoError",
            SweepError::SerializationError(_) => "SerializationError",
            SweepError::DeserializationError(_) => "DeserializationError",
            SweepError::Cancelled(_) => "Cancelled",
            SweepError::TaskError(_) => "TaskError",
        }
    }

    /// Check if this error is transient and worth retrying on the next scheduled run
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SweepError::DatabaseError(_)
                | SweepError::NetworkError(_)
                | SweepError::Timeout(_)
                | SweepError::CompanionError(_)
                | SweepError::MediaServerError(_)
        )
    }

    /// Cancellation is reported as "aborted", never as a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SweepError::Cancelled(_))
    }

    /// Configuration errors abort the current rule group only
    pub fn is_configuration(&self) -> bool {
        matches!(self, SweepError::ConfigError(_) | SweepError::ValidationError(_))
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        SweepError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for SweepError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SweepError::Timeout(err.to_string())
        } else {
            SweepError::NetworkError(err.to_string())
        }
    }
}

/// Serializable error summary attached to failure events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    pub retryable: bool,
}

impl ErrorSummary {
    pub fn from_error(error: &SweepError) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error, self.message)
    }
}

/// Result type alias for operations that can fail with SweepError
pub type Result<T> = std::result::Result<T, SweepError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            SweepError::InitializationError(format!("{}: {}", context_str, e))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context_str = f();
            SweepError::InitializationError(format!("{}: {}", context_str, e))
        })
    }
}
