mod backup;
mod layout;
mod snapshot;

pub use self::backup::BackupInfo;
pub use self::layout::Layout;
pub(crate) use self::snapshot::SnapshotRow;
