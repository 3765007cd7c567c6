use super::BackupInfo;
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::UtcDateTime;

/// One element of the on-disk JSON array.
///
/// Field names are fixed by the snapshot format; timestamps are whole
/// seconds since the Unix epoch.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct SnapshotRow {
    pub(crate) pack_flag: bool,
    pub(crate) fsize: u64,
    pub(crate) atime: u64,
    pub(crate) mtime: u64,
    pub(crate) real_path: String,
    pub(crate) pack_path: String,
    pub(crate) url: String,
}

fn to_epoch(when: UtcDateTime) -> u64 {
    // Pre-epoch timestamps only show up on badly configured clocks.
    u64::try_from(when.unix_timestamp()).unwrap_or(0)
}

fn from_epoch(secs: u64) -> Result<UtcDateTime, Error> {
    let secs = i64::try_from(secs).or_raise(|| ErrorKind::InvalidData("timestamp"))?;
    UtcDateTime::from_unix_timestamp(secs).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

impl TryFrom<&BackupInfo> for SnapshotRow {
    type Error = Error;
    fn try_from(record: &BackupInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            pack_flag: record.archived,
            fsize: record.size,
            atime: to_epoch(record.accessed),
            mtime: to_epoch(record.modified),
            real_path: record.real_path.to_str().ok_or_raise(|| ErrorKind::InvalidData("real path"))?.to_string(),
            pack_path: record.pack_path.to_str().ok_or_raise(|| ErrorKind::InvalidData("pack path"))?.to_string(),
            url: record.url.clone(),
        })
    }
}

impl TryFrom<SnapshotRow> for BackupInfo {
    type Error = Error;
    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            url: row.url,
            real_path: PathBuf::from(row.real_path),
            pack_path: PathBuf::from(row.pack_path),
            size: row.fsize,
            accessed: from_epoch(row.atime)?,
            modified: from_epoch(row.mtime)?,
            archived: row.pack_flag,
            in_transition: false,
        })
    }
}
