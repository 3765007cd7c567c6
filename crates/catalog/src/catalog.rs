//! In-memory record table with a durable JSON snapshot.

use crate::BackupInfo;
use crate::error::{ErrorKind, Result};
use crate::models::SnapshotRow;
use exn::ResultExt;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

/// Thread-safe table of [`BackupInfo`] records keyed by URL.
///
/// Reads take the shared lock, mutations the exclusive one. Every mutation
/// is followed by a full rewrite of the snapshot file, which happens after
/// the exclusive lock has been released.
///
/// # Examples
///
/// ```no_run
/// use tierstore_catalog::Catalog;
///
/// # async fn example() -> tierstore_catalog::error::Result<()> {
/// let catalog = Catalog::open("/var/lib/tierstore/backup.json").await?;
/// for record in catalog.get_all().await {
///     println!("{} archived={}", record.url, record.archived);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    records: RwLock<HashMap<String, BackupInfo>>,
    // Orders snapshot writes: whichever persist runs last copies the newest
    // table, so an older copy can never land on disk after a newer one.
    persist_lock: Mutex<()>,
}

impl Catalog {
    /// Create an empty catalog that persists to `path`. Nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a catalog and load whatever snapshot already exists at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self::new(path);
        catalog.load().await?;
        Ok(catalog)
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Replace the table with the contents of the snapshot file.
    ///
    /// A missing or blank file yields an empty table. Returns the number of
    /// records loaded.
    ///
    /// # Errors
    ///
    /// [`InvalidSnapshot`](ErrorKind::InvalidSnapshot) if the file isn't a
    /// JSON array of snapshot rows.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<usize> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("no snapshot yet, starting empty");
                self.records.write().await.clear();
                return Ok(0);
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(self.path.clone())),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            self.records.write().await.clear();
            return Ok(0);
        }
        let rows: Vec<SnapshotRow> =
            serde_json::from_slice(&raw).or_raise(|| ErrorKind::InvalidSnapshot(self.path.clone()))?;
        let mut table = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = BackupInfo::try_from(row).or_raise(|| ErrorKind::InvalidSnapshot(self.path.clone()))?;
            match table.entry(record.url.clone()) {
                Entry::Occupied(_) => warn!(url = %record.url, "duplicate url in snapshot, keeping first entry"),
                Entry::Vacant(slot) => {
                    slot.insert(record);
                },
            }
        }
        let count = table.len();
        *self.records.write().await = table;
        debug!(count, "loaded snapshot");
        Ok(count)
    }

    /// Rewrite the snapshot file from the current table.
    ///
    /// The new contents go to a sibling `.tmp` file which is then renamed
    /// over the snapshot, so a failed write leaves the previous snapshot in
    /// place.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn persist(&self) -> Result<()> {
        let _ordered = self.persist_lock.lock().await;
        let mut rows = {
            let guard = self.records.read().await;
            guard.values().map(SnapshotRow::try_from).collect::<Result<Vec<_>>>()?
        };
        rows.sort_by(|a, b| a.url.cmp(&b.url));
        let json = serde_json::to_vec_pretty(&rows).or_raise(|| ErrorKind::Serialize)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, &json).await.or_raise(|| ErrorKind::Io(tmp.clone()))?;
        fs::rename(&tmp, &self.path).await.or_raise(|| ErrorKind::Io(self.path.clone()))?;
        debug!(count = rows.len(), "persisted snapshot");
        Ok(())
    }

    /// Add a record that isn't in the table yet.
    ///
    /// Returns `Ok(false)` and leaves the table untouched if the URL is
    /// already present.
    pub async fn insert(&self, record: BackupInfo) -> Result<bool> {
        {
            let mut guard = self.records.write().await;
            match guard.entry(record.url.clone()) {
                Entry::Occupied(_) => {
                    warn!(url = %record.url, "record already exists, ignoring insert");
                    return Ok(false);
                },
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                },
            }
        }
        self.persist_or_revert(record, None).await?;
        Ok(true)
    }

    /// Insert or replace the record stored under `record.url`.
    pub async fn update(&self, record: BackupInfo) -> Result<()> {
        let previous = self.records.write().await.insert(record.url.clone(), record.clone());
        self.persist_or_revert(record, previous).await
    }

    /// Claim a record for an archive or restore job.
    ///
    /// Under the exclusive lock: if the committed record for `record.url` is
    /// already in transition, or has changed tier since the caller read it,
    /// returns `Ok(false)` and changes nothing. Otherwise stores `record`
    /// with `in_transition` set and returns `Ok(true)`; the caller now owns
    /// the record until it writes it back with the flag cleared.
    pub async fn try_begin_transition(&self, mut record: BackupInfo) -> Result<bool> {
        let previous = {
            let mut guard = self.records.write().await;
            if guard
                .get(&record.url)
                .is_some_and(|existing| existing.in_transition || existing.archived != record.archived)
            {
                return Ok(false);
            }
            record.in_transition = true;
            guard.insert(record.url.clone(), record.clone())
        };
        self.persist_or_revert(record, previous).await?;
        Ok(true)
    }

    /// Persist after `written` was stored. If the snapshot can't be written,
    /// the entry goes back to `previous` so a failed call changes nothing,
    /// unless another caller has replaced it in the meantime.
    async fn persist_or_revert(&self, written: BackupInfo, previous: Option<BackupInfo>) -> Result<()> {
        let Err(e) = self.persist().await else {
            return Ok(());
        };
        let mut guard = self.records.write().await;
        if guard.get(&written.url) == Some(&written) {
            warn!(url = %written.url, "snapshot write failed, reverting change");
            match previous {
                Some(previous) => guard.insert(written.url, previous),
                None => guard.remove(&written.url),
            };
        }
        Err(e)
    }

    pub async fn get_by_url(&self, url: &str) -> Option<BackupInfo> {
        self.records.read().await.get(url).cloned()
    }

    /// Look a record up by the path of its hot copy. Linear scan.
    pub async fn get_by_real_path(&self, path: &Path) -> Option<BackupInfo> {
        self.records.read().await.values().find(|record| record.real_path == path).cloned()
    }

    pub async fn get_all(&self) -> Vec<BackupInfo> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Layout;
    use rstest::{fixture, rstest};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tierstore_storage::FileInfo;
    use time::{Duration, UtcDateTime};

    #[fixture]
    fn dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn record(name: &str) -> BackupInfo {
        let file = FileInfo::new(format!("backup/{name}"), 10, UtcDateTime::now());
        BackupInfo::discover(&file, &Layout::default()).unwrap()
    }

    #[rstest]
    #[tokio::test]
    async fn test_open_missing_snapshot(dir: TempDir) {
        let catalog = Catalog::open(dir.path().join("backup.json")).await.unwrap();
        assert!(catalog.is_empty().await);
    }

    #[rstest]
    #[case("")]
    #[case("  \n\t")]
    #[tokio::test]
    async fn test_open_blank_snapshot(dir: TempDir, #[case] contents: &str) {
        let path = dir.path().join("backup.json");
        std::fs::write(&path, contents).unwrap();
        let catalog = Catalog::open(&path).await.unwrap();
        assert_eq!(catalog.len().await, 0);
    }

    #[rstest]
    #[case("{not json")]
    #[case(r#"{"url": "/download/a.txt"}"#)]
    #[case(r#"[{"pack_flag": "yes"}]"#)]
    #[tokio::test]
    async fn test_open_corrupt_snapshot(dir: TempDir, #[case] contents: &str) {
        let path = dir.path().join("backup.json");
        std::fs::write(&path, contents).unwrap();
        let err = Catalog::open(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidSnapshot(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_insert_is_unique(dir: TempDir) {
        let catalog = Catalog::new(dir.path().join("backup.json"));
        assert!(catalog.insert(record("a.txt")).await.unwrap());
        let mut changed = record("a.txt");
        changed.size = 999;
        assert!(!catalog.insert(changed).await.unwrap());
        assert_eq!(catalog.len().await, 1);
        assert_eq!(catalog.get_by_url("/download/a.txt").await.unwrap().size, 10);
    }

    #[rstest]
    #[tokio::test]
    async fn test_update_upserts(dir: TempDir) {
        let catalog = Catalog::new(dir.path().join("backup.json"));
        let mut rec = record("a.txt");
        catalog.update(rec.clone()).await.unwrap();
        rec.archived = true;
        catalog.update(rec.clone()).await.unwrap();
        assert_eq!(catalog.len().await, 1);
        assert_eq!(catalog.get_by_url(&rec.url).await, Some(rec));
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_by_real_path(dir: TempDir) {
        let catalog = Catalog::new(dir.path().join("backup.json"));
        catalog.insert(record("a.txt")).await.unwrap();
        catalog.insert(record("b.txt")).await.unwrap();
        let found = catalog.get_by_real_path(Path::new("backup/b.txt")).await.unwrap();
        assert_eq!(found.url, "/download/b.txt");
        assert!(catalog.get_by_real_path(Path::new("backup/c.txt")).await.is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn test_snapshot_round_trip(dir: TempDir) {
        let path = dir.path().join("state").join("backup.json");
        let catalog = Catalog::new(&path);
        // Sub-second timestamps must not survive into the table.
        let observed = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap() + Duration::milliseconds(750);
        let file = FileInfo::new("backup/a.txt", 10, observed);
        let mut archived = BackupInfo::discover(&file, &Layout::default()).unwrap();
        archived.archived = true;
        let hot = record("b.txt");
        catalog.insert(archived.clone()).await.unwrap();
        catalog.insert(hot.clone()).await.unwrap();
        assert!(catalog.try_begin_transition(hot.clone()).await.unwrap());
        assert!(!catalog.temp_path().exists());

        let reopened = Catalog::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.get_by_url("/download/a.txt").await, Some(archived));
        // Transition ownership dies with the process.
        assert_eq!(reopened.get_by_url("/download/b.txt").await, Some(hot));
    }

    #[rstest]
    #[tokio::test]
    async fn test_failed_persist_changes_nothing(dir: TempDir) {
        let path = dir.path().join("backup.json");
        let catalog = Catalog::new(&path);
        let original = record("a.txt");
        catalog.insert(original.clone()).await.unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        // A directory in place of the temp file makes every snapshot write fail.
        std::fs::create_dir(catalog.temp_path()).unwrap();

        assert!(catalog.try_begin_transition(original.clone()).await.is_err());
        let mut resized = original.clone();
        resized.size = 99;
        assert!(catalog.update(resized).await.is_err());
        assert!(catalog.insert(record("b.txt")).await.is_err());

        assert_eq!(catalog.get_all().await, vec![original.clone()]);
        assert_eq!(std::fs::read(&path).unwrap(), on_disk);

        std::fs::remove_dir(catalog.temp_path()).unwrap();
        assert!(catalog.try_begin_transition(original).await.unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_snapshot_duplicate_urls_keep_first(dir: TempDir) {
        let path = dir.path().join("backup.json");
        let json = r#"[
            {"pack_flag":true,"fsize":1,"atime":0,"mtime":0,"real_path":"backup/a","pack_path":"pack/a.gz","url":"/download/a"},
            {"pack_flag":false,"fsize":2,"atime":0,"mtime":0,"real_path":"backup/a","pack_path":"pack/a.gz","url":"/download/a"}
        ]"#;
        std::fs::write(&path, json).unwrap();
        let catalog = Catalog::open(&path).await.unwrap();
        assert_eq!(catalog.len().await, 1);
        assert_eq!(catalog.get_by_url("/download/a").await.unwrap().size, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_load_replaces_table(dir: TempDir) {
        let path = dir.path().join("backup.json");
        let catalog = Catalog::new(&path);
        catalog.insert(record("a.txt")).await.unwrap();
        std::fs::write(&path, "[]").unwrap();
        assert_eq!(catalog.load().await.unwrap(), 0);
        assert!(catalog.is_empty().await);
    }

    #[rstest]
    #[tokio::test]
    async fn test_transition_is_exclusive(dir: TempDir) {
        let catalog = Catalog::new(dir.path().join("backup.json"));
        catalog.insert(record("a.txt")).await.unwrap();
        assert!(catalog.try_begin_transition(record("a.txt")).await.unwrap());
        assert!(!catalog.try_begin_transition(record("a.txt")).await.unwrap());
        let mut done = catalog.get_by_url("/download/a.txt").await.unwrap();
        assert!(done.in_transition);
        done.in_transition = false;
        catalog.update(done).await.unwrap();
        assert!(catalog.try_begin_transition(record("a.txt")).await.unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_transition_rejects_stale_tier(dir: TempDir) {
        let catalog = Catalog::new(dir.path().join("backup.json"));
        let mut archived = record("a.txt");
        archived.archived = true;
        catalog.insert(archived).await.unwrap();
        // The caller still believes the file is hot.
        assert!(!catalog.try_begin_transition(record("a.txt")).await.unwrap());
        assert!(!catalog.get_by_url("/download/a.txt").await.unwrap().in_transition);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_single_winner(dir: TempDir) {
        let catalog = Arc::new(Catalog::new(dir.path().join("backup.json")));
        catalog.insert(record("a.txt")).await.unwrap();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move { catalog.try_begin_transition(record("a.txt")).await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_persist_latest(dir: TempDir) {
        let path = dir.path().join("backup.json");
        let catalog = Arc::new(Catalog::new(&path));
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                tokio::spawn(async move { catalog.update(record(&format!("{i}.txt"))).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        let reopened = Catalog::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 20);
    }
}
