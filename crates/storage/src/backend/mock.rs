//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::UtcDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    modified: UtcDateTime,
    data: Vec<u8>,
}

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so every trait method
/// works on `&self`. Modification times can be set explicitly to simulate
/// files that went cold, and writes below a prefix can be made to fail.
///
/// # Examples
///
/// ```
/// use tierstore_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("backup/a.txt", b"0123456789")]);
/// assert!(backend.exists(Path::new("backup/a.txt")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, Entry>>,
    denied: Mutex<Vec<PathBuf>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation: broken test setup should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, Entry { modified: now, data: data.into() });
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            denied: Mutex::new(Vec::new()),
        }
    }

    /// Overwrite the modification time of an existing file.
    ///
    /// Panics if the file doesn't exist.
    pub async fn set_modified(&self, path: impl AsRef<Path>, modified: UtcDateTime) {
        let path = validate_path(path.as_ref()).unwrap_or_else(|_| panic!("invalid path"));
        let mut guard = self.storage.write().await;
        let Some(entry) = guard.get_mut(&path) else {
            panic!("MockBackend::set_modified: no file at {}", path.display());
        };
        entry.modified = modified;
    }

    /// Make every subsequent write below `prefix` fail with
    /// [`PermissionDenied`](ErrorKind::PermissionDenied).
    pub fn deny_writes(&self, prefix: impl Into<PathBuf>) {
        self.denied.lock().unwrap_or_else(|e| e.into_inner()).push(prefix.into());
    }

    fn is_denied(&self, path: &Path) -> bool {
        self.denied.lock().unwrap_or_else(|e| e.into_inner()).iter().any(|prefix| path.starts_with(prefix))
    }

    fn file_info(path: &Path, entry: &Entry) -> FileInfo {
        FileInfo::new(path, entry.data.len() as u64, entry.modified)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the read lock, then release it before yielding.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, entry)| Self::file_info(path, entry))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let entry = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(entry.data.clone())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        if self.is_denied(&path) {
            exn::bail!(ErrorKind::PermissionDenied(path));
        }
        let entry = Entry { modified: UtcDateTime::now(), data: data.to_vec() };
        self.storage.write().await.insert(path, entry);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let entry = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::file_info(&path, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("backup/a.txt"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("backup/a.txt")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MockBackend::with_files([("backup/a.txt", b"data")]);
        backend.delete(Path::new("backup/a.txt")).await.unwrap();
        assert!(!backend.exists(Path::new("backup/a.txt")).await.unwrap());
        let err = backend.delete(Path::new("backup/a.txt")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_modified() {
        let backend = MockBackend::with_files([("backup/a.txt", b"data")]);
        let last_week = UtcDateTime::now() - Duration::days(7);
        backend.set_modified("backup/a.txt", last_week).await;
        let info = backend.stat(Path::new("backup/a.txt")).await.unwrap();
        assert_eq!(info.modified, last_week);
        assert_eq!(info.accessed, last_week);
        assert_eq!(info.size, 4);
    }

    #[tokio::test]
    async fn test_deny_writes() {
        let backend = MockBackend::default();
        backend.deny_writes("pack");
        let err = backend.write(Path::new("pack/a.txt.gz"), b"x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
        backend.write(Path::new("backup/a.txt"), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("backup/a.txt", Vec::from(*b"a")),
            ("backup/b.txt", Vec::from(*b"b")),
            ("pack/c.txt.gz", Vec::from(*b"c")),
        ]);
        let files = backend.list(Some(Path::new("backup"))).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
