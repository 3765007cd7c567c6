//! Moving a single file between tiers.
//!
//! Both directions assume the caller already owns the record through
//! [`Catalog::try_begin_transition`]. Ownership ends when the record is
//! written back with `in_transition` cleared.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::Path;
use tierstore_catalog::{BackupInfo, Catalog};
use tierstore_compress::Compression;
use tierstore_storage::{BackendHandle, FileInfo};
use tracing::{debug, info, instrument, warn};

/// Delete `path`, treating "already gone" as success and logging anything
/// else. Used for cleanup where the primary error matters more.
pub(crate) async fn remove_quietly(backend: &BackendHandle, path: &Path) {
    match backend.delete(path).await {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.is_not_found() => {},
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove file"),
    }
}

/// Pack the hot copy of `record` into the archive area and free the hot copy.
///
/// On failure the record is left in transition (nothing retries it while the
/// process runs) and any partially written archive is removed. If the hot
/// copy changed while it was being packed, the archive is discarded and the
/// record handed back as hot.
#[instrument(skip_all, fields(url = %record.url, format = %codec))]
pub async fn archive(
    backend: &BackendHandle,
    catalog: &Catalog,
    codec: Compression,
    mut record: BackupInfo,
) -> Result<BackupInfo> {
    let data = backend.read(&record.real_path).await.or_raise(|| ErrorKind::Storage)?;
    let packed = codec.compress(&data).or_raise(|| ErrorKind::Compression)?;
    if let Err(e) = backend.write(&record.pack_path, &packed).await {
        remove_quietly(backend, &record.pack_path).await;
        return Err(e).or_raise(|| ErrorKind::Storage);
    }

    // Something outside the service may have rewritten the hot copy.
    let current = backend.stat(&record.real_path).await.or_raise(|| ErrorKind::Storage)?;
    if current.size != data.len() as u64 || !record.matches(&current) {
        info!("hot copy changed while packing, keeping it hot");
        remove_quietly(backend, &record.pack_path).await;
        record.refresh(&current);
        record.archived = false;
        record.in_transition = false;
        catalog.update(record.clone()).await.or_raise(|| ErrorKind::Catalog)?;
        return Ok(record);
    }

    record.archived = true;
    backend.delete(&record.real_path).await.or_raise(|| ErrorKind::Storage)?;
    record.in_transition = false;
    catalog.update(record.clone()).await.or_raise(|| ErrorKind::Catalog)?;
    info!(size = record.size, packed = packed.len(), "archived");
    Ok(record)
}

/// Unpack the archive of `record` back into hot storage and remove it.
///
/// Returns the restored contents along with the updated record. On failure
/// the claim is released and the record stays archived, so the next request
/// can try again.
#[instrument(skip_all, fields(url = %record.url))]
pub async fn restore(
    backend: &BackendHandle,
    catalog: &Catalog,
    codec: Compression,
    mut record: BackupInfo,
) -> Result<(BackupInfo, Vec<u8>)> {
    let unpacked = unpack_to_hot(backend, codec, &record).await;

    let (info, data) = match unpacked {
        Ok(ok) => ok,
        Err(e) => {
            record.in_transition = false;
            if let Err(release) = catalog.update(record).await {
                warn!(error = %release, "could not release record after failed restore");
            }
            return Err(e);
        },
    };

    remove_quietly(backend, &record.pack_path).await;
    record.refresh(&info);
    record.archived = false;
    record.in_transition = false;
    catalog.update(record.clone()).await.or_raise(|| ErrorKind::Catalog)?;
    info!(size = record.size, "restored");
    Ok((record, data))
}

async fn unpack_to_hot(backend: &BackendHandle, codec: Compression, record: &BackupInfo) -> Result<(FileInfo, Vec<u8>)> {
    let packed = backend.read(&record.pack_path).await.or_raise(|| ErrorKind::Storage)?;
    // The archive may predate a change of configured format.
    let data = codec.unpack(&packed).or_raise(|| ErrorKind::Compression)?;
    backend.write(&record.real_path, &data).await.or_raise(|| ErrorKind::Storage)?;
    let info = backend.stat(&record.real_path).await.or_raise(|| ErrorKind::Storage)?;
    Ok((info, data))
}
