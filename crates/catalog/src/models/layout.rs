use std::path::{Path, PathBuf};

/// Where a file lives in each tier, and the URL it's served under.
///
/// All three are pure functions of the file name, so a record can always be
/// rebuilt from a directory listing.
///
/// ```
/// use std::path::Path;
/// use tierstore_catalog::Layout;
///
/// let layout = Layout::new("backup", "pack", "/download/", ".gz");
/// assert_eq!(layout.real_path("a.txt"), Path::new("backup/a.txt"));
/// assert_eq!(layout.pack_path("a.txt"), Path::new("pack/a.txt.gz"));
/// assert_eq!(layout.url("a.txt"), "/download/a.txt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    hot_dir: PathBuf,
    pack_dir: PathBuf,
    url_prefix: String,
    archive_suffix: String,
}

impl Layout {
    pub fn new(
        hot_dir: impl Into<PathBuf>,
        pack_dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
        archive_suffix: impl Into<String>,
    ) -> Self {
        Self {
            hot_dir: hot_dir.into(),
            pack_dir: pack_dir.into(),
            url_prefix: url_prefix.into(),
            archive_suffix: archive_suffix.into(),
        }
    }

    pub fn hot_dir(&self) -> &Path {
        &self.hot_dir
    }

    pub fn pack_dir(&self) -> &Path {
        &self.pack_dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn archive_suffix(&self) -> &str {
        &self.archive_suffix
    }

    pub fn real_path(&self, name: &str) -> PathBuf {
        self.hot_dir.join(name)
    }

    pub fn pack_path(&self, name: &str) -> PathBuf {
        self.pack_dir.join(format!("{name}{}", self.archive_suffix))
    }

    pub fn url(&self, name: &str) -> String {
        format!("{}{name}", self.url_prefix)
    }

    /// Reverse of [`url()`](Self::url): the file name a URL refers to, if the
    /// URL carries this layout's prefix.
    pub fn name_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.url_prefix.as_str()).filter(|name| !name.is_empty())
    }

    /// Whether `path` is a direct child of the hot directory.
    pub fn is_hot_child(&self, path: &Path) -> bool {
        path.parent() == Some(self.hot_dir.as_path())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("backup", "pack", "/download/", ".gz")
    }
}
