//! Archive and compression codecs behind the traversal's two seams.
//!
//! The traversal engine consumes containers through exactly two interfaces:
//! [`ArchiveReader`], a lending iterator of named entries with one-shot
//! streams, and a decompressor function returning the single child stream of
//! a compressed payload. Which concrete codec backs them is decided by the
//! [`detect`](crate::detect) classification and the feature flags of this
//! crate.
//!
//! # The entry-stream contract
//!
//! [`ArchiveReader::next_entry`] yields entries in stream order. The entry's
//! stream borrows the reader; it must be consumed (or abandoned) before the
//! next call, which the borrow checker enforces. Whatever the caller leaves
//! unread is skipped by the reader on advance, so abandoning an entry is
//! always safe.

use std::io::Read;
use std::time::SystemTime;

use crate::detect::{ArchiveFormat, Classification, CompressionFormat};
use crate::{Error, Result};

#[cfg(feature = "bzip2")]
mod bz;
#[cfg(feature = "gzip")]
mod gz;
#[cfg(feature = "tar")]
pub(crate) mod tar;
#[cfg(feature = "zip")]
pub(crate) mod zip;

#[cfg(feature = "tar")]
pub use tar::{TarReader, TarWriter};
#[cfg(feature = "zip")]
pub use zip::{ZipReader, ZipWriter};

/// One archive entry, yielded by [`ArchiveReader::next_entry`].
///
/// The `stream` borrows the reader for one-shot consumption; directory
/// entries carry an empty stream and `size == 0`.
pub struct ArchiveEntry<'r> {
    /// Entry name as stored in the archive (may contain `/`).
    pub name: String,
    /// Whether the entry declares itself a directory.
    pub is_directory: bool,
    /// Declared size in bytes; `-1` when unknown until consumed (streaming
    /// ZIP entries with data descriptors). Directory entries are always 0.
    pub size: i64,
    /// Last-modification time, if the format records one.
    pub modified: Option<SystemTime>,
    /// CRC-32 of the contents, if declared up front.
    pub crc: Option<u32>,
    /// Unix mode bits, if the format records them.
    pub mode: Option<u32>,
    /// Owning user id, if recorded.
    pub uid: Option<u64>,
    /// Owning group id, if recorded.
    pub gid: Option<u64>,
    /// The entry contents.
    pub stream: Box<dyn Read + 'r>,
}

impl std::fmt::Debug for ArchiveEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("is_directory", &self.is_directory)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .field("crc", &self.crc)
            .field("mode", &self.mode)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .finish_non_exhaustive()
    }
}

/// A sequential reader of archive entries.
pub trait ArchiveReader {
    /// Advances to the next entry, skipping whatever the previous entry's
    /// consumer left unread.
    ///
    /// Returns `Ok(None)` at the end of the archive. A per-entry failure
    /// (unsupported feature, CRC mismatch discovered on advance) is returned
    /// as an error; the reader stays usable and the next call resumes with
    /// the following entry where the format permits it.
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>>;
}

/// Returns whether this build has a codec for the classification.
///
/// The traversal treats a recognized-but-unavailable container as normal
/// contents instead of failing, so a build without the `bzip2` feature simply
/// greps *through* `.bz2` files as opaque bytes.
pub fn supported(classification: Classification) -> bool {
    match classification {
        Classification::Archive(format) => match format {
            ArchiveFormat::Zip => cfg!(feature = "zip"),
            ArchiveFormat::Tar => cfg!(feature = "tar"),
        },
        Classification::Compressed(format) => match format {
            CompressionFormat::Gzip => cfg!(feature = "gzip"),
            CompressionFormat::Bzip2 => cfg!(feature = "bzip2"),
        },
        Classification::Normal => true,
    }
}

/// Opens an archive reader over a raw byte stream.
pub fn open_archive<'r>(
    format: ArchiveFormat,
    input: Box<dyn Read + 'r>,
) -> Result<Box<dyn ArchiveReader + 'r>> {
    match format {
        #[cfg(feature = "zip")]
        ArchiveFormat::Zip => Ok(Box::new(ZipReader::new(input))),
        #[cfg(feature = "tar")]
        ArchiveFormat::Tar => Ok(Box::new(TarReader::new(input))),
        #[allow(unreachable_patterns)]
        other => Err(Error::Config(format!(
            "archive format '{other}' not enabled in this build"
        ))),
    }
}

/// Opens the decompressed child stream of a compressed payload.
pub fn open_decompressor<'r>(
    format: CompressionFormat,
    input: Box<dyn Read + 'r>,
) -> Result<Box<dyn Read + 'r>> {
    match format {
        #[cfg(feature = "gzip")]
        CompressionFormat::Gzip => Ok(gz::decoder(input)),
        #[cfg(feature = "bzip2")]
        CompressionFormat::Bzip2 => Ok(bz::decoder(input)),
        #[allow(unreachable_patterns)]
        other => Err(Error::Config(format!(
            "compression format '{other}' not enabled in this build"
        ))),
    }
}

/// Compresses a writer-side stream (used by the packer for `.tar.gz` and
/// round-trip tests).
#[cfg(feature = "gzip")]
pub fn gzip_encoder<'w>(output: Box<dyn std::io::Write + 'w>) -> Box<dyn std::io::Write + 'w> {
    gz::encoder(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_matches_features() {
        assert!(supported(Classification::Normal));
        assert_eq!(
            supported(Classification::Archive(ArchiveFormat::Zip)),
            cfg!(feature = "zip")
        );
        assert_eq!(
            supported(Classification::Compressed(CompressionFormat::Bzip2)),
            cfg!(feature = "bzip2")
        );
    }

    #[cfg(all(feature = "gzip", feature = "tar"))]
    #[test]
    fn test_gzip_then_tar_stack() {
        // A .tar.gz built by our own writers must unwrap layer by layer.
        let mut tar_bytes = Vec::new();
        {
            let mut writer = TarWriter::new(&mut tar_bytes);
            writer
                .add_entry("x", None, b"12345".len() as u64, &mut &b"12345"[..])
                .unwrap();
            writer.finish().unwrap();
        }
        let mut gz_bytes = Vec::new();
        {
            let mut enc =
                flate2::write::GzEncoder::new(&mut gz_bytes, flate2::Compression::default());
            std::io::Write::write_all(&mut enc, &tar_bytes).unwrap();
            enc.finish().unwrap();
        }

        let decompressed =
            open_decompressor(CompressionFormat::Gzip, Box::new(&gz_bytes[..])).unwrap();
        let mut archive = open_archive(ArchiveFormat::Tar, decompressed).unwrap();
        let mut entry = archive.next_entry().unwrap().expect("one entry");
        assert_eq!(entry.name, "x");
        assert_eq!(entry.size, 5);
        let mut data = Vec::new();
        entry.stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"12345");
        drop(entry);
        assert!(archive.next_entry().unwrap().is_none());
    }
}
