//! Error types shared by the tubevault core

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for core operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Bad arguments or configuration, surfaced before any work begins
    #[error("Validation error: {message}")]
    #[diagnostic(code(tubevault::core::validation))]
    Validation {
        /// What was rejected and why
        message: String,
    },

    /// I/O error with path context
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(tubevault::core::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "write", "rename", "sync")
        operation: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(tubevault::core::serialization))]
    Serialization {
        /// What failed to encode or decode
        message: String,
    },
}

impl Error {
    /// Create a validation error
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
