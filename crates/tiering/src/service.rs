//! Operations behind upload, download and listing requests.

use crate::archive::{remove_quietly, restore};
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::{Component, Path};
use std::sync::Arc;
use tierstore_catalog::{BackupInfo, Catalog, Layout};
use tierstore_compress::Compression;
use tierstore_storage::BackendHandle;
use time::UtcDateTime;
use time::macros::format_description;
use tracing::{debug, info, instrument, warn};

/// A downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub record: BackupInfo,
    pub data: Vec<u8>,
    /// `name-size-mtime`, stable until the file is replaced.
    pub etag: String,
}

/// One row of the file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub file_name: String,
    pub url: String,
    pub size: u64,
    pub modified: UtcDateTime,
    pub archived: bool,
}

impl Listing {
    /// Size rounded down to the largest whole unit: `512B`, `3KB`, `1GB`.
    pub fn human_size(&self) -> String {
        human_size(self.size)
    }

    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn last_modified(&self) -> String {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        // Only fails for years outside 0..=9999.
        self.modified.format(&format).unwrap_or_else(|_| self.modified.unix_timestamp().to_string())
    }
}

/// Render a byte count with binary units, truncating like `ls -h` without
/// decimals.
///
/// ```
/// use tierstore_tiering::human_size;
///
/// assert_eq!(human_size(1023), "1023B");
/// assert_eq!(human_size(1024), "1KB");
/// assert_eq!(human_size(5 * 1024 * 1024 + 1), "5MB");
/// ```
pub fn human_size(bytes: u64) -> String {
    const K: u64 = 1024;
    const M: u64 = K * 1024;
    const G: u64 = M * 1024;
    match bytes {
        b if b < K => format!("{b}B"),
        b if b < M => format!("{}KB", b / K),
        b if b < G => format!("{}MB", b / M),
        b => format!("{}GB", b / G),
    }
}

/// ETag for a record: file name, size and modification time in seconds.
pub fn etag(record: &BackupInfo) -> Result<String> {
    let name = record.file_name().or_raise(|| ErrorKind::Catalog)?;
    Ok(format!("{name}-{}-{}", record.size, record.modified.unix_timestamp()))
}

/// Request-facing side of the store.
///
/// Uploads always land in hot storage. Downloads of archived files restore
/// them to hot storage first, so the classifier will only archive them again
/// once they've gone cold.
pub struct Service {
    backend: BackendHandle,
    catalog: Arc<Catalog>,
    codec: Compression,
    layout: Layout,
}

impl Service {
    pub fn new(backend: BackendHandle, catalog: Arc<Catalog>, codec: Compression, layout: Layout) -> Self {
        Self { backend, catalog, codec, layout }
    }

    fn check_name(name: &str) -> Result<()> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(only)), None) if only == name && !name.contains('\0') => Ok(()),
            _ => exn::bail!(ErrorKind::InvalidName(name.to_string())),
        }
    }

    /// Store an uploaded file in hot storage and record it.
    ///
    /// Re-uploading a name replaces the previous file. If the previous file
    /// was archived, its archive is removed. An existing record is claimed
    /// for the duration of the write, the same way archive and restore jobs
    /// claim it.
    ///
    /// # Errors
    ///
    /// [`Busy`](ErrorKind::Busy) while a job is moving the previous file.
    /// Retry later.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn ingest(&self, name: &str, data: &[u8]) -> Result<BackupInfo> {
        Self::check_name(name)?;
        let url = self.layout.url(name);
        let previous = match self.catalog.get_by_url(&url).await {
            Some(previous) => {
                if !self.catalog.try_begin_transition(previous.clone()).await.or_raise(|| ErrorKind::Catalog)? {
                    exn::bail!(ErrorKind::Busy(url));
                }
                Some(previous)
            },
            None => None,
        };

        let record = match self.store(name, data).await {
            Ok(record) => record,
            Err(e) => {
                if let Some(previous) = previous {
                    self.release(previous).await;
                }
                return Err(e);
            },
        };

        match previous {
            Some(previous) => {
                if let Err(e) = self.catalog.update(record.clone()).await {
                    self.release(previous).await;
                    return Err(e).or_raise(|| ErrorKind::Catalog);
                }
                if previous.archived {
                    debug!(path = %previous.pack_path.display(), "removing archive of replaced file");
                    remove_quietly(&self.backend, &previous.pack_path).await;
                }
            },
            None => {
                if !self.catalog.insert(record.clone()).await.or_raise(|| ErrorKind::Catalog)? {
                    // A classification pass recorded the new file first.
                    let current =
                        self.catalog.get_by_url(&url).await.ok_or_raise(|| ErrorKind::NotFound(url.clone()))?;
                    if !self.catalog.try_begin_transition(current).await.or_raise(|| ErrorKind::Catalog)? {
                        exn::bail!(ErrorKind::Busy(url));
                    }
                    self.catalog.update(record.clone()).await.or_raise(|| ErrorKind::Catalog)?;
                }
            },
        }
        info!(url = %record.url, "stored upload");
        Ok(record)
    }

    async fn store(&self, name: &str, data: &[u8]) -> Result<BackupInfo> {
        let real_path = self.layout.real_path(name);
        self.backend.write(&real_path, data).await.or_raise(|| ErrorKind::Storage)?;
        let info = self.backend.stat(&real_path).await.or_raise(|| ErrorKind::Storage)?;
        BackupInfo::discover(&info, &self.layout).or_raise(|| ErrorKind::Catalog)
    }

    /// Hand back a record claimed by [`ingest()`](Self::ingest) unchanged.
    async fn release(&self, mut record: BackupInfo) {
        record.in_transition = false;
        if let Err(e) = self.catalog.update(record).await {
            warn!(error = ?e, "could not release record after failed upload");
        }
    }

    /// Download a file, restoring it from the archive if needed.
    ///
    /// # Errors
    ///
    /// - [`NotFound`](ErrorKind::NotFound) if no record has this URL.
    /// - [`Busy`](ErrorKind::Busy) if another job is moving the file and the
    ///   hot copy can't be served in the meantime. Retry later.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<Fetched> {
        let record = self.catalog.get_by_url(url).await.ok_or_raise(|| ErrorKind::NotFound(url.to_string()))?;

        let (record, data) = if record.archived {
            if !self.catalog.try_begin_transition(record.clone()).await.or_raise(|| ErrorKind::Catalog)? {
                exn::bail!(ErrorKind::Busy(url.to_string()));
            }
            restore(&self.backend, &self.catalog, self.codec, record).await?
        } else {
            match self.backend.read(&record.real_path).await {
                Ok(data) => (record, data),
                // Being archived right now: the hot copy was just freed.
                Err(e) if e.is_not_found() && record.in_transition => exn::bail!(ErrorKind::Busy(url.to_string())),
                Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
            }
        };
        let etag = etag(&record)?;
        Ok(Fetched { record, data, etag })
    }

    /// Like [`fetch()`](Self::fetch), but returns `None` without touching
    /// storage when `if_none_match` equals the file's current ETag.
    pub async fn fetch_if_changed(&self, url: &str, if_none_match: Option<&str>) -> Result<Option<Fetched>> {
        if let Some(expected) = if_none_match
            && let Some(current) = self.etag(url).await?
            && current == expected
        {
            return Ok(None);
        }
        self.fetch(url).await.map(Some)
    }

    /// Current ETag of the file behind `url`, if there is one.
    pub async fn etag(&self, url: &str) -> Result<Option<String>> {
        self.catalog.get_by_url(url).await.map(|record| etag(&record)).transpose()
    }

    /// Every known file, hot or archived, sorted by name.
    pub async fn listing(&self) -> Result<Vec<Listing>> {
        let mut rows = self
            .catalog
            .get_all()
            .await
            .into_iter()
            .map(|record| -> Result<Listing> {
                Ok(Listing {
                    file_name: record.file_name().or_raise(|| ErrorKind::Catalog)?,
                    url: record.url,
                    size: record.size,
                    modified: record.modified,
                    archived: record.archived,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive;
    use crate::{HotManager, ManualClock, Settings};
    use rstest::rstest;
    use tempfile::TempDir;
    use tierstore_executor::Executor;
    use tierstore_storage::backend::{LocalBackend, MockBackend, StorageBackend};
    use time::Duration;

    fn mock_service() -> (Arc<MockBackend>, Arc<Catalog>, Service, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockBackend::default());
        let catalog = Arc::new(Catalog::new(dir.path().join("backup.json")));
        let service = Service::new(mock.clone(), Arc::clone(&catalog), Compression::Gzip, Layout::default());
        (mock, catalog, service, dir)
    }

    #[rstest]
    #[case("a.txt", true)]
    #[case("report 2024.tar.gz", true)]
    #[case("", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("nested/a.txt", false)]
    #[case("/etc/passwd", false)]
    #[case("a\0b", false)]
    fn test_check_name(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(Service::check_name(name).is_ok(), valid);
    }

    #[rstest]
    #[case(0, "0B")]
    #[case(1023, "1023B")]
    #[case(1024, "1KB")]
    #[case(1024 * 1024 - 1, "1023KB")]
    #[case(3 * 1024 * 1024, "3MB")]
    #[case(2 * 1024 * 1024 * 1024, "2GB")]
    fn test_human_size(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(human_size(bytes), expected);
    }

    #[tokio::test]
    async fn test_ingest_and_fetch_hot() {
        let (mock, _catalog, service, _dir) = mock_service();
        let record = service.ingest("a.txt", b"0123456789").await.unwrap();
        assert_eq!(record.url, "/download/a.txt");
        assert_eq!(mock.read(Path::new("backup/a.txt")).await.unwrap(), b"0123456789");

        let fetched = service.fetch("/download/a.txt").await.unwrap();
        assert_eq!(fetched.data, b"0123456789");
        assert_eq!(fetched.etag, format!("a.txt-10-{}", record.modified.unix_timestamp()));
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_name() {
        let (_mock, catalog, service, _dir) = mock_service();
        let err = service.ingest("../escape", b"x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidName(_)));
        assert!(catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_unknown() {
        let (_mock, _catalog, service, _dir) = mock_service();
        let err = service.fetch("/download/missing.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(url) if url == "/download/missing.txt"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_busy_archive() {
        let (mock, catalog, service, _dir) = mock_service();
        let mut record = service.ingest("a.txt", b"0123456789").await.unwrap();
        mock.delete(Path::new("backup/a.txt")).await.unwrap();
        record.archived = true;
        record.in_transition = true;
        catalog.update(record).await.unwrap();
        let err = service.fetch("/download/a.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Busy(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_busy_serves_hot_copy() {
        let (_mock, catalog, service, _dir) = mock_service();
        let record = service.ingest("a.txt", b"0123456789").await.unwrap();
        assert!(catalog.try_begin_transition(record).await.unwrap());
        assert_eq!(service.fetch("/download/a.txt").await.unwrap().data, b"0123456789");
    }

    #[tokio::test]
    async fn test_reupload_replaces_archive() {
        let (mock, catalog, service, _dir) = mock_service();
        let mut record = service.ingest("a.txt", b"old").await.unwrap();
        mock.write(&record.pack_path, &Compression::Gzip.compress(b"old").unwrap()).await.unwrap();
        mock.delete(&record.real_path).await.unwrap();
        record.archived = true;
        catalog.update(record).await.unwrap();

        let replaced = service.ingest("a.txt", b"new contents").await.unwrap();
        assert!(!replaced.archived);
        assert!(!mock.exists(Path::new("pack/a.txt.gz")).await.unwrap());
        assert_eq!(service.fetch("/download/a.txt").await.unwrap().data, b"new contents");
        assert_eq!(catalog.len().await, 1);
    }

    #[tokio::test]
    async fn test_ingest_while_archiving_is_busy() {
        let (mock, catalog, service, _dir) = mock_service();
        let record = service.ingest("a.txt", b"old").await.unwrap();
        assert!(catalog.try_begin_transition(record.clone()).await.unwrap());

        let err = service.ingest("a.txt", b"new").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Busy(_)));
        assert!(err.is_retryable());
        assert_eq!(mock.read(Path::new("backup/a.txt")).await.unwrap(), b"old");

        // Once the job is done, the retried upload replaces the archive.
        let backend: BackendHandle = mock.clone();
        assert!(archive(&backend, &catalog, Compression::Gzip, record).await.unwrap().archived);
        let replaced = service.ingest("a.txt", b"new").await.unwrap();
        let stored = catalog.get_by_url("/download/a.txt").await.unwrap();
        assert_eq!(stored, replaced);
        assert!(!stored.archived);
        assert!(!stored.in_transition);
        assert!(!mock.exists(Path::new("pack/a.txt.gz")).await.unwrap());
        assert_eq!(mock.read(Path::new("backup/a.txt")).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_reupload_releases_record() {
        let (mock, catalog, service, _dir) = mock_service();
        let original = service.ingest("a.txt", b"old").await.unwrap();
        mock.deny_writes("backup");
        let err = service.ingest("a.txt", b"new").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
        assert_eq!(catalog.get_by_url("/download/a.txt").await, Some(original));
    }

    #[tokio::test]
    async fn test_fetch_if_changed() {
        let (_mock, _catalog, service, _dir) = mock_service();
        service.ingest("a.txt", b"0123456789").await.unwrap();
        let etag = service.etag("/download/a.txt").await.unwrap().unwrap();
        assert!(service.fetch_if_changed("/download/a.txt", Some(&etag)).await.unwrap().is_none());
        assert!(service.fetch_if_changed("/download/a.txt", Some("stale")).await.unwrap().is_some());
        assert!(service.fetch_if_changed("/download/a.txt", None).await.unwrap().is_some());
        assert!(service.etag("/download/missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_sorted() {
        let (_mock, _catalog, service, _dir) = mock_service();
        service.ingest("zeta.txt", &[0; 2048]).await.unwrap();
        service.ingest("alpha.txt", b"a").await.unwrap();
        let rows = service.listing().await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, ["alpha.txt", "zeta.txt"]);
        assert_eq!(rows[0].url, "/download/alpha.txt");
        assert_eq!(rows[1].human_size(), "2KB");
        assert_eq!(rows[1].last_modified().len(), "2024-01-01 00:00:00".len());
    }

    /// Upload, let the file go cold and get archived, then download it back.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_upload_archive_download() {
        let dir = tempfile::tempdir().unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new("local", dir.path().join("store")).unwrap());
        let catalog = Arc::new(Catalog::new(dir.path().join("store/backup.json")));
        let executor = Arc::new(Executor::new(3).unwrap());
        let clock = Arc::new(ManualClock::new(UtcDateTime::now()));
        let layout = Layout::default();
        let service = Service::new(Arc::clone(&backend), Arc::clone(&catalog), Compression::Gzip, layout.clone());
        let manager = HotManager::new(
            Arc::clone(&backend),
            Arc::clone(&catalog),
            Arc::clone(&executor),
            Compression::Gzip,
            layout,
            Settings::default(),
        )
        .with_clock(clock.clone());

        service.ingest("a.txt", b"0123456789").await.unwrap();
        clock.advance(Duration::minutes(1));
        assert_eq!(manager.scan_once().await.unwrap().submitted, 1);
        tokio::task::spawn_blocking(move || executor.shutdown()).await.unwrap();

        assert!(!dir.path().join("store/backup/a.txt").exists());
        assert!(dir.path().join("store/pack/a.txt.gz").exists());
        assert!(catalog.get_by_url("/download/a.txt").await.unwrap().archived);

        let fetched = service.fetch("/download/a.txt").await.unwrap();
        assert_eq!(fetched.data, b"0123456789");
        assert!(!fetched.record.archived);
        assert!(!dir.path().join("store/pack/a.txt.gz").exists());
        assert_eq!(std::fs::read(dir.path().join("store/backup/a.txt")).unwrap(), b"0123456789");

        // The snapshot agrees after a restart.
        let reopened = Catalog::open(dir.path().join("store/backup.json")).await.unwrap();
        let record = reopened.get_by_url("/download/a.txt").await.unwrap();
        assert!(!record.archived);
        assert!(!record.in_transition);
    }
}
