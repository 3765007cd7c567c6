//! Hot/cold tiering for tierstore.
//!
//! Files arrive in hot storage through [`Service::ingest`]. The
//! [`HotManager`] periodically finds files that haven't been modified within
//! the hot window and hands them to the executor, which packs each one into
//! the archive area and frees the hot copy. [`Service::fetch`] reverses this
//! on demand, so a download always reads from hot storage.
//!
//! A record is owned by at most one archive or restore at a time, claimed
//! with [`Catalog::try_begin_transition`](tierstore_catalog::Catalog::try_begin_transition)
//! before any work is queued.

mod archive;
mod clock;
pub mod error;
mod hot;
mod service;

pub use crate::archive::{archive, restore};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::hot::{HotManager, ReconcileReport, ScanReport, Settings};
pub use crate::service::{Fetched, Listing, Service, etag, human_size};
