//! Tiering Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Dependency failures are raised as the subsystem that
//! failed, with the original error kept underneath in the tree.

use derive_more::{Display, Error};

/// A tiering error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for tiering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a tiering failure.
///
/// ### Request Errors
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::Busy`]
/// - [`ErrorKind::InvalidName`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Catalog`]
/// - [`ErrorKind::Compression`]
/// - [`ErrorKind::Spawn`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No record exists for the requested URL.
    #[display("no such file: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Another job is moving the file between tiers right now.
    #[display("file is being moved between tiers: {_0}")]
    Busy(#[error(not(source))] String),
    /// An uploaded file name is empty, contains a separator, or escapes the
    /// hot directory.
    #[display("invalid file name: {_0:?}")]
    InvalidName(#[error(not(source))] String),
    /// A storage backend operation (list, read, write, delete) failed.
    #[display("storage operation failed")]
    Storage,
    /// The catalog could not be read or persisted.
    #[display("catalog operation failed")]
    Catalog,
    /// Packing or unpacking an archive failed.
    #[display("compression failed")]
    Compression,
    /// The classifier thread could not be started.
    #[display("could not spawn classifier thread")]
    Spawn,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::Storage)
    }
}
