//! Run-level error types for the warm pipeline
//!
//! Item-level failures never appear here; they are statuses in the result.

use miette::Diagnostic;
use thiserror::Error;

/// Error type for a whole warm pass
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Bad run arguments, surfaced before any work begins
    #[error("Validation error: {message}")]
    #[diagnostic(code(tubevault::warm::validation))]
    Validation {
        /// What was rejected and why
        message: String,
    },

    /// The Storage collaborator failed while listing candidates
    #[error("Storage error")]
    #[diagnostic(code(tubevault::warm::storage))]
    Storage {
        /// The collaborator's error
        #[source]
        source: tubevault_core::StorageError,
    },

    /// The HTTP client could not be constructed
    #[error("HTTP client setup failed: {message}")]
    #[diagnostic(code(tubevault::warm::client))]
    ClientSetup {
        /// Builder-supplied detail
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
}

impl From<tubevault_core::StorageError> for Error {
    fn from(source: tubevault_core::StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<tubevault_core::Error> for Error {
    fn from(err: tubevault_core::Error) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}

/// Result type for warm pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
