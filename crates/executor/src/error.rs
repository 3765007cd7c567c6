//! Executor Error Types

use derive_more::{Display, Error};

/// An executor error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for job outcomes.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The job panicked. The worker that ran it carries on.
    #[display("job panicked: {_0}")]
    Panicked(#[error(not(source))] String),
    /// The executor was shut down before the job was accepted.
    #[display("executor is shut down")]
    ShutDown,
    /// The job was discarded without producing a result.
    #[display("job dropped before completion")]
    Dropped,
    /// A worker thread could not be started.
    #[display("could not spawn worker thread")]
    Spawn,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn)
    }
}
