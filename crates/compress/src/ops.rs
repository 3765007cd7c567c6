//! Packing and unpacking operations.

use crate::Compression;
use crate::error::{ErrorKind, Result};
#[cfg(feature = "brotli")]
use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use bzip2::{Compression as BzCompression, read::BzDecoder, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::{read::XzDecoder, write::XzEncoder};
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

// Archived files are cold: favour size over packing speed.
const BZIP2_LEVEL: BzCompression = BzCompression::best();
const GZIP_LEVEL: GzCompression = GzCompression::best();
#[cfg(feature = "xz")]
const XZ_LEVEL: u32 = 9;
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 19;
#[cfg(feature = "brotli")]
const BROTLI_LEVEL: u32 = 11;
#[cfg(feature = "brotli")]
const BROTLI_BUFFER_SIZE: usize = 4096;
#[cfg(feature = "brotli")]
const BROTLI_LG_WINDOW_SIZE: u32 = 22;

impl Compression {
    /// Pack a whole file in memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use tierstore_compress::Compression;
    ///
    /// let packed = Compression::Gzip.compress(b"cold file contents").unwrap();
    /// assert_eq!(Compression::Gzip.decompress(&packed).unwrap(), b"cold file contents");
    /// ```
    #[instrument(skip(input), fields(format = %self, input_size = input.len(), output_size))]
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let packed = match self {
            Compression::None => input.to_vec(),
            #[cfg(feature = "brotli")]
            Compression::Brotli => {
                let mut packed = Vec::with_capacity(input.len() / 2);
                {
                    let mut encoder =
                        BrotliEncoder::new(&mut packed, BROTLI_BUFFER_SIZE, BROTLI_LEVEL, BROTLI_LG_WINDOW_SIZE);
                    encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
                }
                packed
            },
            Compression::Bzip2 => finish(BzEncoder::new(Vec::new(), BZIP2_LEVEL), input, BzEncoder::finish)?,
            Compression::Gzip => finish(GzEncoder::new(Vec::new(), GZIP_LEVEL), input, GzEncoder::finish)?,
            #[cfg(feature = "xz")]
            Compression::Xz => finish(XzEncoder::new(Vec::new(), XZ_LEVEL), input, XzEncoder::finish)?,
            #[cfg(feature = "zstd")]
            Compression::Zstd => {
                let encoder = ZstdEncoder::new(Vec::new(), ZSTD_LEVEL).or_raise(|| ErrorKind::Encoder)?;
                finish(encoder, input, ZstdEncoder::finish)?
            },
        };
        tracing::Span::current().record("output_size", packed.len());
        Ok(packed)
    }

    /// Unpack a whole archive in memory, assuming it is in this format.
    #[instrument(skip(input), fields(format = %self, input_size = input.len(), output_size))]
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder: Box<dyn Read + '_> = match self {
            Compression::None => return Ok(input.to_vec()),
            #[cfg(feature = "brotli")]
            Compression::Brotli => Box::new(BrotliDecoder::new(input, BROTLI_BUFFER_SIZE)),
            Compression::Bzip2 => Box::new(BzDecoder::new(input)),
            Compression::Gzip => Box::new(GzDecoder::new(input)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(input)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(input).or_raise(|| ErrorKind::Encoder)?),
        };
        let mut data = Vec::with_capacity(input.len().saturating_mul(2));
        decoder.read_to_end(&mut data).or_raise(|| ErrorKind::InvalidData)?;
        tracing::Span::current().record("output_size", data.len());
        Ok(data)
    }

    /// Decompress an archive, trusting its magic bytes over `self`.
    ///
    /// Archives outlive configuration changes: a file packed with bzip2 must
    /// still restore after the configured format was switched to gzip. `self`
    /// is only used when the archive has no recognisable header.
    ///
    /// ```
    /// use tierstore_compress::Compression;
    ///
    /// let packed = Compression::Bzip2.compress(b"written last year").unwrap();
    /// let restored = Compression::Gzip.unpack(&packed).unwrap();
    /// assert_eq!(restored, b"written last year");
    /// ```
    pub fn unpack(&self, input: &[u8]) -> Result<Vec<u8>> {
        let format = Self::from_magic_bytes(input).unwrap_or(*self);
        if format != *self {
            tracing::debug!(configured = %self, detected = %format, "archive format differs from configuration");
        }
        format.decompress(input)
    }
}

/// Feed `input` through a writer-style encoder and take back its buffer.
fn finish<E: Write>(
    mut encoder: E,
    input: &[u8],
    done: impl FnOnce(E) -> std::io::Result<Vec<u8>>,
) -> Result<Vec<u8>> {
    encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
    done(encoder).or_raise(|| ErrorKind::Io)
}
