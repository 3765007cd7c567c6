//! Metadata catalog for tierstore.
//!
//! Tracks one [`BackupInfo`] per uploaded file: where its hot copy and
//! archive live, the URL it's served under, and which tier currently holds
//! the data. The table is kept in memory and rewritten in full to a JSON
//! snapshot after every change.
//!
//! The snapshot is not the source of truth for file contents, the storage
//! backend is. A record that disagrees with what's on disk is healed at
//! startup by the tiering layer.

mod catalog;
pub mod error;
mod lock;
mod models;

pub use crate::catalog::Catalog;
pub use crate::lock::SnapshotLock;
pub use crate::models::{BackupInfo, Layout};
