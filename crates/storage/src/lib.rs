//! File store for tierstore.
//!
//! Hot files and archives both live in a [`StorageBackend`], addressed by
//! paths relative to the backend root (`backup/report.txt`,
//! `pack/report.txt.gz`). The tiering layer never touches the filesystem
//! directly.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{file_name, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
