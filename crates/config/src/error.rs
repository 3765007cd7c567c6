//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Both are fatal at startup: fix the configuration and restart.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A provider (file or environment) could not be read or parsed.
    #[display("could not load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// A value parsed but makes no sense.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
