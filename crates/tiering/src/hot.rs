//! Hot/cold classification loop.

use crate::archive::{archive, remove_quietly};
use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;
use tierstore_catalog::{BackupInfo, Catalog, Layout};
use tierstore_compress::Compression;
use tierstore_executor::{Executor, Priority};
use tierstore_storage::{BackendHandle, FileInfo};
use time::{Duration, UtcDateTime};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Timing knobs for [`HotManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// A file modified within this window of "now" is hot. The boundary is
    /// inclusive.
    pub hot_window: Duration,
    /// Pause between classification passes.
    pub scan_interval: StdDuration,
    /// Pause after a pass that found the hot directory empty.
    pub idle_interval: StdDuration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hot_window: Duration::seconds(30),
            scan_interval: StdDuration::from_millis(1000),
            idle_interval: StdDuration::from_millis(100),
        }
    }
}

/// Counts from one classification pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Files found directly inside the hot directory.
    pub seen: usize,
    /// Files that had no record yet.
    pub discovered: usize,
    pub hot: usize,
    /// Files already owned by another job.
    pub busy: usize,
    /// Files deleted between listing and classification.
    pub vanished: usize,
    /// Archival jobs handed to the executor.
    pub submitted: usize,
    pub failed: usize,
}

/// Counts from one [`HotManager::reconcile`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Records whose `archived` flag was flipped to match storage.
    pub healed: usize,
    /// Leftover copies deleted because the other tier is authoritative.
    pub stale_removed: usize,
    /// Records with neither a hot copy nor an archive.
    pub lost: usize,
}

enum Verdict {
    Hot,
    Busy,
    Vanished,
    Submitted,
}

/// Periodically moves files that went cold from hot storage to the archive.
///
/// Each pass lists the hot directory, looks every file up in the catalog
/// (creating a record for files it hasn't seen), and for each cold file not
/// already owned by another job claims the record and submits an archival
/// job at [`Priority::Background`]. The claim is taken before submission,
/// so overlapping passes never queue the same file twice.
pub struct HotManager {
    backend: BackendHandle,
    catalog: Arc<Catalog>,
    executor: Arc<Executor>,
    codec: Compression,
    layout: Layout,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl HotManager {
    pub fn new(
        backend: BackendHandle,
        catalog: Arc<Catalog>,
        executor: Arc<Executor>,
        codec: Compression,
        layout: Layout,
        settings: Settings,
    ) -> Self {
        Self {
            backend,
            catalog,
            executor,
            codec,
            layout,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, typically with a
    /// [`ManualClock`](crate::ManualClock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether `record` was modified within the hot window of `now`.
    ///
    /// ```
    /// use tierstore_catalog::{BackupInfo, Layout};
    /// use tierstore_storage::FileInfo;
    /// use tierstore_tiering::{HotManager, Settings};
    /// use time::{Duration, UtcDateTime};
    ///
    /// let now = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    /// let file = FileInfo::new("backup/a.txt", 1, now - Duration::seconds(30));
    /// let record = BackupInfo::discover(&file, &Layout::default()).unwrap();
    /// assert!(HotManager::is_hot_at(&record, now, Duration::seconds(30)));
    /// assert!(!HotManager::is_hot_at(&record, now + Duration::seconds(1), Duration::seconds(30)));
    /// ```
    pub fn is_hot_at(record: &BackupInfo, now: UtcDateTime, window: Duration) -> bool {
        now - record.modified <= window
    }

    pub fn is_hot(&self, record: &BackupInfo, now: UtcDateTime) -> bool {
        Self::is_hot_at(record, now, self.settings.hot_window)
    }

    /// Run one classification pass.
    ///
    /// Must be called from within a Tokio runtime: archival jobs block on
    /// that runtime from the executor's worker threads. Per-file failures are
    /// logged and counted; only failing to list the hot directory is an
    /// error.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let files = self.backend.list(Some(self.layout.hot_dir())).await.or_raise(|| ErrorKind::Storage)?;
        let now = self.clock.now();
        let mut report = ScanReport::default();
        for file in files.iter().filter(|file| self.layout.is_hot_child(&file.path)) {
            report.seen += 1;
            match self.classify(file, now, &mut report).await {
                Ok(Verdict::Hot) => report.hot += 1,
                Ok(Verdict::Busy) => report.busy += 1,
                Ok(Verdict::Vanished) => report.vanished += 1,
                Ok(Verdict::Submitted) => report.submitted += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %file.path.display(), error = ?e, "could not classify file");
                },
            }
        }
        if report.submitted > 0 || report.failed > 0 {
            info!(?report, "classification pass finished");
        } else {
            debug!(?report, "classification pass finished");
        }
        Ok(report)
    }

    async fn classify(&self, file: &FileInfo, now: UtcDateTime, report: &mut ScanReport) -> Result<Verdict> {
        let (mut record, known) = match self.catalog.get_by_real_path(&file.path).await {
            Some(record) => (record, true),
            None => (BackupInfo::discover(file, &self.layout).or_raise(|| ErrorKind::Catalog)?, false),
        };
        if record.in_transition {
            return Ok(Verdict::Busy);
        }
        if !self.backend.exists(&file.path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(Verdict::Vanished);
        }
        record.refresh(file);
        if self.is_hot(&record, now) {
            if !known {
                report.discovered += 1;
                self.catalog.insert(record).await.or_raise(|| ErrorKind::Catalog)?;
            }
            return Ok(Verdict::Hot);
        }
        if !known {
            report.discovered += 1;
        }
        if !self.catalog.try_begin_transition(record.clone()).await.or_raise(|| ErrorKind::Catalog)? {
            return Ok(Verdict::Busy);
        }
        self.submit_archive(record);
        Ok(Verdict::Submitted)
    }

    fn submit_archive(&self, record: BackupInfo) {
        let runtime = Handle::current();
        let backend = Arc::clone(&self.backend);
        let catalog = Arc::clone(&self.catalog);
        let codec = self.codec;
        let url = record.url.clone();
        debug!(%url, "submitting archival job");
        // Failures are logged at the job boundary; nobody waits on the handle.
        drop(self.executor.submit(Priority::Background, move || {
            if let Err(e) = runtime.block_on(archive(&backend, &catalog, codec, record)) {
                error!(%url, error = ?e, "archival failed, record stays in transition");
            }
        }));
    }

    /// Heal the catalog from what's actually in storage.
    ///
    /// Meant to run once at startup, before the classification loop, to
    /// repair whatever an interrupted archive or restore left behind:
    ///
    /// | `archived` | hot copy | archive | action                           |
    /// |------------|----------|---------|----------------------------------|
    /// | yes        | yes      | no      | mark hot                         |
    /// | yes        | yes      | yes     | remove hot copy                  |
    /// | no         | no       | yes     | mark archived                    |
    /// | no         | yes      | yes     | remove archive                   |
    /// | any        | no       | no      | log as lost                      |
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for mut record in self.catalog.get_all().await {
            if record.in_transition {
                continue;
            }
            report.checked += 1;
            let hot = self.backend.exists(&record.real_path).await.or_raise(|| ErrorKind::Storage)?;
            let packed = self.backend.exists(&record.pack_path).await.or_raise(|| ErrorKind::Storage)?;
            match (record.archived, hot, packed) {
                (true, true, false) => {
                    warn!(url = %record.url, "archive missing, marking hot");
                    record.archived = false;
                    self.catalog.update(record).await.or_raise(|| ErrorKind::Catalog)?;
                    report.healed += 1;
                },
                (true, true, true) => {
                    // An interrupted restore: the hot copy may be partial.
                    warn!(url = %record.url, "removing leftover hot copy of archived file");
                    remove_quietly(&self.backend, &record.real_path).await;
                    report.stale_removed += 1;
                },
                (false, false, true) => {
                    warn!(url = %record.url, "hot copy missing, marking archived");
                    record.archived = true;
                    self.catalog.update(record).await.or_raise(|| ErrorKind::Catalog)?;
                    report.healed += 1;
                },
                (false, true, true) => {
                    // An interrupted archive: the archive may be partial.
                    warn!(url = %record.url, "removing stale archive of hot file");
                    remove_quietly(&self.backend, &record.pack_path).await;
                    report.stale_removed += 1;
                },
                (_, false, false) => {
                    error!(url = %record.url, "neither hot copy nor archive exists");
                    report.lost += 1;
                },
                (true, false, true) | (false, true, false) => {},
            }
        }
        info!(?report, "reconciliation finished");
        Ok(report)
    }

    /// Classify until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(hot_window = %self.settings.hot_window, "classifier started");
        while !*shutdown.borrow() {
            let pause = match self.scan_once().await {
                Ok(report) if report.seen == 0 => self.settings.idle_interval,
                Ok(_) => self.settings.scan_interval,
                Err(e) => {
                    error!(error = ?e, "classification pass failed");
                    self.settings.scan_interval
                },
            };
            tokio::select! {
                () = tokio::time::sleep(pause) => {},
                changed = shutdown.changed() => if changed.is_err() {
                    break;
                },
            }
        }
        info!("classifier stopped");
    }

    /// Start [`run()`](Self::run) on a dedicated, named OS thread driven by
    /// `runtime`.
    pub fn spawn(self: Arc<Self>, runtime: Handle, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("tierstore-classifier".into())
            .spawn(move || runtime.block_on(self.run(shutdown)))
            .or_raise(|| ErrorKind::Spawn)
    }
}
