//! Compression codec for archived files.
//!
//! Cold files are packed into the archive area with one of the formats wrapped
//! by the [`Compression`] enum:
//!
//! - **Packing/unpacking** in memory ([`Compression::compress`],
//!   [`Compression::decompress`], [`Compression::unpack`])
//! - **Format detection** from magic bytes
//!   ([`Compression::from_magic_bytes`]), so archives written with a
//!   previously configured format can still be restored.
//!
//! Bzip2 and Gzip are always available. Brotli, XZ and Zstd are behind feature
//! flags. Every format uses its highest compression level: archived files are
//! cold, so storage space matters more than packing speed.

mod construct;
pub mod error;
mod ops;
mod util;

/// A supported compression format.
///
/// Variants gated behind feature flags (`brotli`, `xz`, `zstd`) are only
/// available when the corresponding feature is enabled. Defaults to
/// [`Gzip`](Self::Gzip).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Stored as-is
    None,
    /// Brotli compression (.br)
    #[cfg(feature = "brotli")]
    Brotli,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    #[default]
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::Gzip);
    }
}
