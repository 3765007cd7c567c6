//! Storage models.

use std::path::PathBuf;
use time::UtcDateTime;

/// File metadata returned by storage backends.
///
/// A point-in-time observation of a physical file, used both when listing
/// the hot directory and when stat-ing a single file after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
    /// Last accessed timestamp (equal to `modified` where the platform or
    /// backend doesn't track access times)
    pub accessed: UtcDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            accessed: modified,
        }
    }

    pub fn with_accessed(mut self, accessed: UtcDateTime) -> Self {
        self.accessed = accessed;
        self
    }
}
