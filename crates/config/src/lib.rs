//! Configuration for tierstore.
//!
//! Values are layered with [`figment`], later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. A TOML file: the path given on the command line, else
//!    `tierstore.toml` in the platform config directory (if it exists).
//! 3. `TIERSTORE_*` environment variables, e.g. `TIERSTORE_HOT_TIME=3600`.
//!
//! ```toml
//! root = "/srv/tierstore"
//! hot_time = 3600
//! compression = "bzip2"
//! workers = 4
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tierstore_compress::Compression;
use tracing::debug;

pub const ENV_PREFIX: &str = "TIERSTORE_";
pub const CONFIG_FILE_NAME: &str = "tierstore.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "tierstore")
}

/// Default location of the configuration file, if the platform has one.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage root. Hot files, archives and (by default) the catalog
    /// snapshot all live underneath.
    pub root: PathBuf,
    /// Hot storage directory, relative to `root`.
    pub hot_dir: PathBuf,
    /// Archive directory, relative to `root`.
    pub pack_dir: PathBuf,
    /// Catalog snapshot file; relative paths are resolved against `root`.
    pub snapshot: PathBuf,
    /// Prepended to file names to form download URLs.
    pub url_prefix: String,
    /// Format used for new archives.
    pub compression: Compression,
    /// Appended to file names in the archive directory. Defaults to the
    /// extension of `compression`.
    pub archive_suffix: Option<String>,
    /// Seconds since last modification during which a file counts as hot.
    pub hot_time: u64,
    pub scan_interval_ms: u64,
    pub idle_interval_ms: u64,
    /// Executor worker threads.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let root = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/var/lib/tierstore"));
        Self {
            root,
            hot_dir: PathBuf::from("backup"),
            pack_dir: PathBuf::from("pack"),
            snapshot: PathBuf::from("backup.json"),
            url_prefix: "/download/".to_string(),
            compression: Compression::default(),
            archive_suffix: None,
            hot_time: 30,
            scan_interval_ms: 1000,
            idle_interval_ms: 100,
            workers: 3,
        }
    }
}

impl Config {
    /// The layered figment, before extraction.
    ///
    /// An explicitly requested `file` must exist; the default file is
    /// skipped when missing.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new();
        match file {
            Some(path) if !path.is_file() => {
                exn::bail!(ErrorKind::Load(format!("no such file: {}", path.display())));
            },
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Some(path) = default_config_file().filter(|p| p.is_file()) {
                    debug!(path = %path.display(), "using default config file");
                    figment = figment.merge(Toml::file(path));
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load and validate the configuration.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(file)?)
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would misplace files or stall the pipeline.
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("root must be absolute: {}", self.root.display())));
        }
        for (key, dir) in [("hot_dir", &self.hot_dir), ("pack_dir", &self.pack_dir)] {
            let mut components = dir.components();
            if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
                exn::bail!(ErrorKind::Invalid(format!("{key} must be a single directory name: {}", dir.display())));
            }
        }
        if self.hot_dir == self.pack_dir {
            exn::bail!(ErrorKind::Invalid("hot_dir and pack_dir must differ".to_string()));
        }
        if self.archive_suffix().is_empty() {
            exn::bail!(ErrorKind::Invalid("archive_suffix must not be empty".to_string()));
        }
        if self.url_prefix.is_empty() {
            exn::bail!(ErrorKind::Invalid("url_prefix must not be empty".to_string()));
        }
        if self.workers == 0 {
            exn::bail!(ErrorKind::Invalid("workers must be at least 1".to_string()));
        }
        if self.scan_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("scan_interval_ms must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(&self.snapshot)
    }

    pub fn archive_suffix(&self) -> &str {
        self.archive_suffix.as_deref().unwrap_or(self.compression.extension())
    }

    pub fn hot_window(&self) -> Duration {
        Duration::from_secs(self.hot_time)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}
