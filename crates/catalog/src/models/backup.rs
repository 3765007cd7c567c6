use super::Layout;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::PathBuf;
use tierstore_storage::FileInfo;
use time::{Duration, UtcDateTime};

/// Catalog record for one backed-up file.
///
/// At rest exactly one tier is authoritative: the hot copy at `real_path`
/// when `archived` is false, the archive at `pack_path` when it is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Unique key, `url_prefix + file_name`.
    pub url: String,
    /// Hot copy, relative to the storage root.
    pub real_path: PathBuf,
    /// Archive, relative to the storage root.
    pub pack_path: PathBuf,
    pub size: u64,
    pub accessed: UtcDateTime,
    pub modified: UtcDateTime,
    pub archived: bool,
    /// Set while an archive or restore job owns the record. Never persisted.
    pub in_transition: bool,
}

/// Drop the sub-second part of a timestamp.
///
/// The snapshot stores whole seconds, so records only ever hold whole
/// seconds too and a reload yields an identical record.
pub(crate) fn whole_seconds(when: UtcDateTime) -> UtcDateTime {
    when - Duration::nanoseconds(i64::from(when.nanosecond()))
}

impl BackupInfo {
    /// Synthesize a record for a file observed in hot storage.
    ///
    /// ```
    /// use tierstore_catalog::{BackupInfo, Layout};
    /// use tierstore_storage::FileInfo;
    /// use time::UtcDateTime;
    ///
    /// let file = FileInfo::new("backup/a.txt", 10, UtcDateTime::now());
    /// let record = BackupInfo::discover(&file, &Layout::default()).unwrap();
    /// assert_eq!(record.url, "/download/a.txt");
    /// assert!(!record.archived);
    /// ```
    pub fn discover(file: &FileInfo, layout: &Layout) -> Result<Self> {
        let name = tierstore_storage::file_name(&file.path).or_raise(|| ErrorKind::InvalidData("file name"))?;
        Ok(Self {
            url: layout.url(&name),
            real_path: layout.real_path(&name),
            pack_path: layout.pack_path(&name),
            size: file.size,
            accessed: whole_seconds(file.accessed),
            modified: whole_seconds(file.modified),
            archived: false,
            in_transition: false,
        })
    }

    /// Copy size and timestamps from a fresh observation of the hot copy.
    pub fn refresh(&mut self, file: &FileInfo) {
        self.size = file.size;
        self.modified = whole_seconds(file.modified);
        self.accessed = whole_seconds(file.accessed);
    }

    /// Whether `file` still looks like the hot copy this record describes.
    pub fn matches(&self, file: &FileInfo) -> bool {
        self.size == file.size && self.modified == whole_seconds(file.modified)
    }

    /// Final path component of the hot copy.
    pub fn file_name(&self) -> Result<String> {
        tierstore_storage::file_name(&self.real_path).or_raise(|| ErrorKind::InvalidData("file name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_discover() {
        let modified = UtcDateTime::now() - Duration::hours(1);
        let file = FileInfo::new("backup/report.txt", 42, modified);
        let layout = Layout::new("backup", "pack", "/download/", ".bz2");
        let record = BackupInfo::discover(&file, &layout).unwrap();
        assert_eq!(record.url, "/download/report.txt");
        assert_eq!(record.real_path, Path::new("backup/report.txt"));
        assert_eq!(record.pack_path, Path::new("pack/report.txt.bz2"));
        assert_eq!(record.size, 42);
        assert_eq!(record.modified, modified.replace_nanosecond(0).unwrap());
        assert_eq!(record.modified.nanosecond(), 0);
        assert!(!record.archived);
        assert!(!record.in_transition);
        assert_eq!(record.file_name().unwrap(), "report.txt");
    }

    #[test]
    fn test_refresh() {
        let layout = Layout::default();
        let mut record = BackupInfo::discover(&FileInfo::new("backup/a.txt", 1, UtcDateTime::now()), &layout).unwrap();
        let later = UtcDateTime::now() + Duration::minutes(5);
        record.refresh(&FileInfo::new("backup/a.txt", 99, later));
        assert_eq!(record.size, 99);
        assert_eq!(record.modified, whole_seconds(later));
        assert_eq!(record.accessed, whole_seconds(later));
    }

    #[test]
    fn test_matches_at_second_precision() {
        let observed = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::milliseconds(750);
        let file = FileInfo::new("backup/a.txt", 10, observed);
        let record = BackupInfo::discover(&file, &Layout::default()).unwrap();
        assert!(record.matches(&file));
        assert!(record.matches(&FileInfo::new("backup/a.txt", 10, observed + Duration::milliseconds(100))));
        assert!(!record.matches(&FileInfo::new("backup/a.txt", 11, observed)));
        assert!(!record.matches(&FileInfo::new("backup/a.txt", 10, observed + Duration::seconds(1))));
    }
}
