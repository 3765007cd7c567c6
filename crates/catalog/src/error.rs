//! Catalog Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or writing the snapshot file failed.
    #[display("snapshot I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The snapshot on disk could not be parsed. Fatal at startup: the file
    /// needs repairing or moving aside by hand.
    #[display("invalid snapshot: {}", _0.display())]
    InvalidSnapshot(#[error(not(source))] PathBuf),
    /// The in-memory records could not be serialized.
    #[display("could not serialize catalog")]
    Serialize,
    /// Another process holds the snapshot lock. Stop the running server, or
    /// wait for the other command to finish.
    #[display("snapshot is in use by another process: {}", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    /// A record field is out of range for its snapshot representation.
    #[display("invalid record data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Locked(_))
    }
}
