//! Run-level error types for enrichment
//!
//! Item- and batch-level failures are outcome values in the run result;
//! only errors that prevent or abort a whole run appear here.

use miette::Diagnostic;
use thiserror::Error;

/// Error type for a whole enrichment run
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Bad run arguments, surfaced before any work begins
    #[error("Validation error: {message}")]
    #[diagnostic(code(tubevault::enrich::validation))]
    Validation {
        /// What was rejected and why
        message: String,
    },

    /// Another process holds the enrichment lock
    #[error("Enrichment lock unavailable")]
    #[diagnostic(
        code(tubevault::enrich::lock_unavailable),
        help("Another enrichment run is in progress; retry after it finishes")
    )]
    LockUnavailable,

    /// The Storage collaborator failed outside any batch
    #[error("Storage error")]
    #[diagnostic(code(tubevault::enrich::storage))]
    Storage {
        /// The collaborator's error
        #[source]
        source: tubevault_core::StorageError,
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

/// Result type for enrichment operations
pub type Result<T> = std::result::Result<T, Error>;
