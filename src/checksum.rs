//! Checksum computation utilities.
//!
//! This module provides CRC-32 and Adler-32 checksum computation, used by the
//! `-checksum` expression action and by the ZIP codec for entry verification.
//!
//! # CRC-32
//!
//! CRC-32 uses the IEEE 802.3 polynomial (same as Ethernet, ZIP, gzip).
//! It is the checksum recorded in ZIP entry headers.
//!
//! # Adler-32
//!
//! Adler-32 is the zlib checksum. It is cheaper to compute than CRC-32 and is
//! offered by the `-checksum ADLER32` action for parity with the classic
//! `java.util.zip` checksum pair.
//!
//! # Example
//!
//! ```rust
//! use spelunk::checksum::{Adler32, Checksum, Crc32};
//!
//! let mut crc = Crc32::new();
//! crc.update(b"Hello, ");
//! crc.update(b"World!");
//! let value = crc.finalize();
//!
//! // One-shot computation
//! assert_eq!(Crc32::compute(b"Hello, World!"), value);
//! let _ = Adler32::compute(b"Hello, World!");
//! ```

use std::io::{self, Read};

use crate::READ_BUFFER_SIZE;

/// Common trait for checksum computation.
pub trait Checksum: Default + Clone {
    /// The output type of this checksum.
    type Output: Copy + Eq + std::fmt::Debug;

    /// Creates a new checksum calculator.
    fn new() -> Self;

    /// Updates the checksum with additional data.
    fn update(&mut self, data: &[u8]);

    /// Finishes the checksum computation and returns the value.
    fn finalize(&self) -> Self::Output;

    /// Resets the checksum to its initial state.
    fn reset(&mut self);

    /// Computes the checksum of a single slice in one call.
    fn compute(data: &[u8]) -> Self::Output {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Computes the checksum by draining a reader.
    fn compute_reader<R: Read>(reader: &mut R) -> io::Result<Self::Output> {
        let mut hasher = Self::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

/// CRC-32 checksum calculator (IEEE 802.3 polynomial).
///
/// # Example
///
/// ```rust
/// use spelunk::checksum::{Checksum, Crc32};
///
/// let mut crc = Crc32::new();
/// crc.update(b"Hello, World!");
/// assert_eq!(crc.finalize(), 0xEC4AC3D0);
/// ```
#[derive(Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.hasher.clone().finalize())
            .finish()
    }
}

impl Checksum for Crc32 {
    type Output = u32;

    fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

/// Adler-32 checksum calculator (zlib checksum).
///
/// # Example
///
/// ```rust
/// use spelunk::checksum::{Adler32, Checksum};
///
/// // "Wikipedia" is the classic Adler-32 reference vector.
/// assert_eq!(Adler32::compute(b"Wikipedia"), 0x11E60398);
/// ```
#[derive(Clone)]
pub struct Adler32 {
    hasher: adler2::Adler32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Adler32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adler32")
            .field("current", &self.hasher.checksum())
            .finish()
    }
}

impl Checksum for Adler32 {
    type Output = u32;

    fn new() -> Self {
        Self {
            hasher: adler2::Adler32::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.write_slice(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.checksum()
    }

    fn reset(&mut self) {
        self.hasher = adler2::Adler32::new();
    }
}

/// A reader adapter that updates a checksum with every byte read through it.
///
/// Used by the ZIP codec to verify entry CRCs while the visitor consumes the
/// stream, without buffering the contents.
pub struct ChecksumReader<R, C: Checksum> {
    inner: R,
    hasher: C,
    bytes_read: u64,
}

impl<R: Read, C: Checksum> ChecksumReader<R, C> {
    /// Wraps a reader with a fresh checksum state.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: C::new(),
            bytes_read: 0,
        }
    }

    /// Returns the checksum of everything read so far.
    pub fn checksum(&self) -> C::Output {
        self.hasher.finalize()
    }

    /// Returns the number of bytes read through this adapter.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unwraps the adapter, returning the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read, C: Checksum> Read for ChecksumReader<R, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(Crc32::compute(b"Hello, World!"), 0xEC4AC3D0);
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(Crc32::compute(b""), 0);
    }

    #[test]
    fn test_crc32_incremental_matches_oneshot() {
        let mut crc = Crc32::new();
        crc.update(b"Hello, ");
        crc.update(b"World!");
        assert_eq!(crc.finalize(), Crc32::compute(b"Hello, World!"));
    }

    #[test]
    fn test_crc32_reset() {
        let mut crc = Crc32::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"Hello, World!");
        assert_eq!(crc.finalize(), 0xEC4AC3D0);
    }

    #[test]
    fn test_adler32_known_value() {
        assert_eq!(Adler32::compute(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn test_adler32_empty() {
        assert_eq!(Adler32::compute(b""), 1);
    }

    #[test]
    fn test_adler32_reset() {
        let mut adler = Adler32::new();
        adler.update(b"garbage");
        adler.reset();
        adler.update(b"Wikipedia");
        assert_eq!(adler.finalize(), 0x11E60398);
    }

    #[test]
    fn test_compute_reader() {
        let mut data: &[u8] = b"Hello, World!";
        let crc = Crc32::compute_reader(&mut data).unwrap();
        assert_eq!(crc, 0xEC4AC3D0);
    }

    #[test]
    fn test_checksum_reader_observes_stream() {
        let data = b"Hello, World!";
        let mut reader: ChecksumReader<_, Crc32> = ChecksumReader::new(&data[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.checksum(), 0xEC4AC3D0);
        assert_eq!(reader.bytes_read(), data.len() as u64);
    }
}
