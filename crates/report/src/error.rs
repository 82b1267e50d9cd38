//! Error types for report persistence

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for report operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while writing the report
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(tubevault::report::io),
        help("Check that the exports directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// The report failed to encode
    #[error("Report serialization error: {message}")]
    #[diagnostic(code(tubevault::report::serialization))]
    Serialization {
        /// What failed
        message: String,
    },
}

impl Error {
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
            tubevault_core::Error::Validation { message }
            | tubevault_core::Error::Serialization { message } => {
                Self::Serialization { message }
            }
        }
    }
}

/// Result type for report operations
pub type Result<T> = std::result::Result<T, Error>;
