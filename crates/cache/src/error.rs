//! Error types for the cache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(tubevault::cache::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// The entity cannot be mapped to a cache key
    #[error("Invalid cache key: {message}")]
    #[diagnostic(code(tubevault::cache::invalid_key))]
    InvalidKey {
        /// Why the key was rejected
        message: String,
    },

    /// Marker payload failed to encode or decode
    #[error("Marker serialization error: {message}")]
    #[diagnostic(code(tubevault::cache::serialization))]
    Serialization {
        /// What failed
        message: String,
    },
}

impl Error {
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

    /// Create an invalid-key error
    #[must_use]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: msg.into(),
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

impl From<tubevault_core::Error> for Error {
    fn from(err: tubevault_core::Error) -> Self {
        match err {
            tubevault_core::Error::Io {
                source,
                path,
                operation,
            } => Self::Io {
                source,
                path,
                operation,
            },
            tubevault_core::Error::Validation { message } => Self::InvalidKey { message },
            tubevault_core::Error::Serialization { message } => Self::Serialization { message },
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
