//! Error types for the shelfsync engine.

use thiserror::Error;

/// All possible errors from the shelfsync engine.
///
/// Every variant describes a record that must be rejected rather than
/// partially accepted: the transform layer fails closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Wire decoding errors
    #[error("invalid timestamp for '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("malformed blob in '{field}': {reason}")]
    MalformedBlob { field: &'static str, reason: String },

    #[error("unsupported blob version {version} in '{field}'")]
    UnsupportedBlobVersion { field: &'static str, version: u32 },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    // Location errors
    #[error("invalid location '{input}': {reason}")]
    InvalidLocation { input: String, reason: String },

    // Protocol errors
    #[error("unknown sync type: {0}")]
    UnknownSyncType(String),
}

impl Error {
    pub(crate) fn blob(field: &'static str, reason: impl ToString) -> Self {
        Error::MalformedBlob {
            field,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn value(field: &'static str, value: impl Into<String>) -> Self {
        Error::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
