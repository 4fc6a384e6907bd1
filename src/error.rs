//! Error types for the metrics query engine

use crate::types::Resolution;
use thiserror::Error;

/// Main error type for the query engine
#[derive(Error, Debug)]
pub enum Error {
    /// Batch envelope content type is not recognized
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Batch envelope body could not be decoded into a list of URIs
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A single request URI does not follow the path/query grammar
    #[error("Malformed query {uri}: {reason}")]
    MalformedQuery {
        /// The offending request URI
        uri: String,
        /// What the grammar rejected
        reason: String,
    },

    /// The storage collaborator failed to load a table or scan it
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a malformed query error for the given URI
    pub fn malformed_query(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedQuery {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status class the transport should answer with
    pub fn status_hint(&self) -> u16 {
        match self {
            Error::UnsupportedEncoding(_) => 415,
            Error::MalformedEnvelope(_) | Error::MalformedQuery { .. } => 400,
            Error::StorageUnavailable(_) => 503,
            Error::Configuration(_) | Error::Io(_) => 500,
        }
    }
}

/// Storage collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend cannot be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The factory failed to construct a time-series table
    #[error("failed to load table for resolution {resolution}: {message}")]
    TableLoad {
        /// Requested resolution
        resolution: Resolution,
        /// Factory diagnostic
        message: String,
    },

    /// A scan started but could not complete
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
