//! Errors raised while packing or unpacking archives.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong with an archive, from the caller's point of view.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The codec library refused to set up a stream.
    Encoder,
    /// Archive is corrupt or not in the expected format. Don't retry.
    #[display("invalid or corrupted archive")]
    InvalidData,
    /// The requested format is not known.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The requested format is known but its feature is not enabled.
    #[display("disabled format: {_0}")]
    DisabledFormat(#[error(not(source))] String),
    /// The encoder failed while writing packed output.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidData.to_string(), "invalid or corrupted archive");
        assert_eq!(ErrorKind::UnsupportedFormat("lz".to_string()).to_string(), "unsupported format: lz");
        assert_eq!(ErrorKind::DisabledFormat("zstd".to_string()).to_string(), "disabled format: zstd");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::InvalidData.is_retryable());
        assert!(!ErrorKind::DisabledFormat("xz".to_string()).is_retryable());
        assert!(ErrorKind::Io.is_retryable());
    }

    #[test]
    fn error_from_corrupt_archive() {
        let err = crate::Compression::Gzip.decompress(&[0x1F, 0x8B, 0xFF]).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
    }
}
