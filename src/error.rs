//! Error types, one enum per pipeline stage.
//!
//! - **ParseError**: the link cannot become a descriptor. `UnrecognizedScheme`
//!   when the prefix is wrong, `MalformedUri` for any structural decoding
//!   failure (authority, credentials, port, base64, JSON).
//! - **BuildError**: the descriptor cannot become an engine outbound.
//! - **ProbeError**: the engine or a measurement request failed.
//! - **OutputError**: reading links or writing the report failed; fatal to a run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for link parsing operations
pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Errors that can occur while parsing a link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The link prefix does not belong to the variant (or to any variant)
    #[error("unrecognized scheme: {0}")]
    UnrecognizedScheme(String),
    /// Authority, credentials, port or query could not be decoded
    #[error("malformed link: {0}")]
    MalformedUri(String),
}

impl From<base64::DecodeError> for ParseError {
    fn from(err: base64::DecodeError) -> Self {
        ParseError::MalformedUri(format!("base64 decode error: {}", err))
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::MalformedUri(format!("json parse error: {}", err))
    }
}

impl From<std::string::FromUtf8Error> for ParseError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ParseError::MalformedUri(format!("invalid utf-8: {}", err))
    }
}

/// Errors raised while building an engine outbound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A field holds a value the engine cannot accept (e.g. non-numeric port)
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },
}

impl BuildError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        BuildError::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Errors raised by the engine or a measurement request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The engine could not materialize a live instance
    #[error("engine failed to start: {0}")]
    StartFailed(String),
    /// The delay request failed or timed out
    #[error("no response: {0}")]
    NoResponse(String),
    /// A download or upload request failed or timed out
    #[error("speed test failed: {0}")]
    SpeedtestFailed(String),
}

/// Errors raised while reading input links or writing the report
#[derive(Debug, Error)]
pub enum OutputError {
    /// The report file could not be written
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        /// Target path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The links file could not be read
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        /// Source path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// CSV serialization failed
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
