//! Path validation.
//!
//! Every path handed to a backend is relative to the backend root. Uploaded
//! file names come from clients, so they are checked before they ever reach
//! the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and normalizes it.
///
/// `.` components and duplicate separators are removed and `..` is resolved,
/// but a path may never climb above the storage root. Null bytes, Windows
/// prefixes and paths that normalize to nothing are rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tierstore_storage::validate_path;
///
/// assert!(validate_path("backup/report.txt").is_ok());
/// assert!(validate_path("backup/../pack/report.txt.gz").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("backup/../../escape").is_err());
/// assert_eq!(
///     validate_path("./backup//report.txt/").unwrap(),
///     Path::new("backup/report.txt")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // C strings in syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Extracts the final component of a path as UTF-8.
///
/// URLs and archive names are derived from this, so a path whose file name
/// is missing or not valid UTF-8 is an [`InvalidPath`](ErrorKind::InvalidPath).
///
/// ```
/// use tierstore_storage::file_name;
///
/// assert_eq!(file_name("backup/report.txt").unwrap(), "report.txt");
/// assert!(file_name("backup/..").is_err());
/// ```
pub fn file_name(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
    }
}
