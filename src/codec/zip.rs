//! Streaming ZIP reader and writer.
//!
//! The reader walks local file headers in stream order, without seeking and
//! without the central directory, so it works on pipes and on entries nested
//! inside other containers. Entries compressed with deflate are inflated
//! through a hand-driven [`flate2::Decompress`] state so the reader knows
//! exactly how many raw bytes each entry consumed — required to locate the
//! next header after an abandoned entry, and to find the data descriptor of
//! entries whose sizes are only declared after the fact (those entries
//! surface `size = -1`).
//!
//! Unsupported per-entry features (encryption, zip64, exotic compression
//! methods) are reported as recoverable per-entry errors; the reader skips
//! the entry when the header carries enough information to do so.
//!
//! The writer buffers each entry's compressed form in memory, writes local
//! headers with final sizes (no descriptors), and emits the central directory
//! on [`finish`](ZipWriter::finish).

use std::io::{self, Read, Write};
use std::time::SystemTime;

use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use flate2::{Compression, Decompress, FlushDecompress, Status};

use super::{ArchiveEntry, ArchiveReader};
use crate::checksum::{Checksum, Crc32};
use crate::{Error, Result};

const LOCAL_HEADER_SIG: u32 = 0x04034B50;
const CENTRAL_HEADER_SIG: u32 = 0x02014B50;
const EOCD_SIG: u32 = 0x06054B50;
const DESCRIPTOR_SIG: u32 = 0x08074B50;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const IN_BUF_SIZE: usize = 8 * 1024;

/// A buffered byte source with exact consumption accounting.
///
/// Refills never over-commit: bytes stay in the buffer until `consume`, so
/// the reader can stop precisely at entry boundaries even when the inflater
/// looked ahead.
struct Source<'r> {
    inner: Box<dyn Read + 'r>,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    eof: bool,
}

impl<'r> Source<'r> {
    fn new(inner: Box<dyn Read + 'r>) -> Self {
        Self {
            inner,
            buf: vec![0u8; IN_BUF_SIZE],
            pos: 0,
            len: 0,
            eof: false,
        }
    }

    /// Returns the buffered bytes, refilling if empty. Empty slice = EOF.
    fn fill(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.len && !self.eof {
            self.pos = 0;
            self.len = self.inner.read(&mut self.buf)?;
            if self.len == 0 {
                self.eof = true;
            }
        }
        Ok(&self.buf[self.pos..self.len])
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.len);
        self.pos += n;
    }

    fn read_exact(&mut self, out: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let available = self.fill()?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of zip stream",
                ));
            }
            let n = available.len().min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&available[..n]);
            self.consume(n);
            filled += n;
        }
        Ok(())
    }

    fn skip(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            let available = self.fill()?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of zip stream while skipping",
                ));
            }
            let step = (available.len() as u64).min(n) as usize;
            self.consume(step);
            n -= step as u64;
        }
        Ok(())
    }
}

/// Decode state of the entry currently being read.
enum EntryState {
    /// Between entries.
    Idle,
    /// Stored (method 0) entry with `remaining` raw bytes of data.
    Stored {
        remaining: u64,
        crc: Crc32,
        declared_crc: u32,
        name: String,
    },
    /// Deflated (method 8) entry.
    Deflate {
        decomp: Box<Decompress>,
        /// Raw bytes still to feed, when the compressed size is known.
        raw_remaining: Option<u64>,
        done: bool,
        crc: Crc32,
        /// Known up front unless the entry uses a data descriptor.
        declared_crc: Option<u32>,
        has_descriptor: bool,
        name: String,
    },
}

/// Streaming ZIP reader over local file headers.
pub struct ZipReader<'r> {
    source: Source<'r>,
    state: EntryState,
    finished: bool,
}

impl<'r> ZipReader<'r> {
    /// Creates a reader over a raw zip byte stream.
    pub fn new(source: Box<dyn Read + 'r>) -> Self {
        Self {
            source: Source::new(source),
            state: EntryState::Idle,
            finished: false,
        }
    }

    /// Drains the current entry (if any), verifies its CRC, and positions the
    /// source at the next local header.
    fn finish_current(&mut self) -> Result<()> {
        let mut scratch = [0u8; IN_BUF_SIZE];
        loop {
            match read_entry_data(&mut self.source, &mut self.state, &mut scratch) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    // Cannot locate the next header after a broken entry.
                    self.finished = true;
                    return Err(e);
                }
            }
        }

        let state = std::mem::replace(&mut self.state, EntryState::Idle);
        match state {
            EntryState::Idle => {}
            EntryState::Stored {
                crc,
                declared_crc,
                name,
                ..
            } => {
                verify_crc(&name, declared_crc, crc.finalize())?;
            }
            EntryState::Deflate {
                crc,
                declared_crc,
                has_descriptor,
                name,
                ..
            } => {
                let declared = if has_descriptor {
                    Some(self.read_descriptor()?)
                } else {
                    declared_crc
                };
                if let Some(declared) = declared {
                    verify_crc(&name, declared, crc.finalize())?;
                }
            }
        }
        Ok(())
    }

    /// Reads the data descriptor that follows a flagged entry's data.
    /// Returns the declared CRC.
    fn read_descriptor(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        self.source.read_exact(&mut word)?;
        let first = u32::from_le_bytes(word);
        let crc = if first == DESCRIPTOR_SIG {
            self.source.read_exact(&mut word)?;
            u32::from_le_bytes(word)
        } else {
            // Descriptor without the optional signature.
            first
        };
        // Compressed and uncompressed sizes.
        let mut sizes = [0u8; 8];
        self.source.read_exact(&mut sizes)?;
        Ok(crc)
    }
}

fn verify_crc(name: &str, declared: u32, actual: u32) -> Result<()> {
    if declared != actual {
        return Err(Error::Corrupt {
            format: "zip",
            reason: format!("entry '{name}': crc mismatch (declared {declared:#010x}, got {actual:#010x})"),
        });
    }
    Ok(())
}

/// Reads decompressed entry bytes into `buf` according to `state`.
///
/// Free function (not a method) so the lending entry stream can call it while
/// borrowing the reader's fields.
fn read_entry_data(
    source: &mut Source<'_>,
    state: &mut EntryState,
    buf: &mut [u8],
) -> Result<usize> {
    match state {
        EntryState::Idle => Ok(0),
        EntryState::Stored { remaining, crc, .. } => {
            if *remaining == 0 || buf.is_empty() {
                return Ok(0);
            }
            let available = source.fill()?;
            if available.is_empty() {
                return Err(Error::Corrupt {
                    format: "zip",
                    reason: "truncated stored entry data".into(),
                });
            }
            let n = available.len().min(buf.len()).min(*remaining as usize);
            buf[..n].copy_from_slice(&available[..n]);
            source.consume(n);
            *remaining -= n as u64;
            crc.update(&buf[..n]);
            Ok(n)
        }
        EntryState::Deflate {
            decomp,
            raw_remaining,
            done,
            crc,
            ..
        } => {
            if *done || buf.is_empty() {
                return Ok(0);
            }
            loop {
                if *raw_remaining == Some(0) {
                    // All declared bytes fed; the stream must end now.
                    let before_out = decomp.total_out();
                    let status = decomp
                        .decompress(&[], buf, FlushDecompress::Finish)
                        .map_err(|e| Error::Corrupt {
                            format: "zip",
                            reason: format!("deflate error: {e}"),
                        })?;
                    let produced = (decomp.total_out() - before_out) as usize;
                    crc.update(&buf[..produced]);
                    if status == Status::StreamEnd {
                        *done = true;
                        return Ok(produced);
                    }
                    if produced > 0 {
                        return Ok(produced);
                    }
                    return Err(Error::Corrupt {
                        format: "zip",
                        reason: "deflate stream continues past declared size".into(),
                    });
                }
                let available = source.fill()?;
                let capped = match raw_remaining {
                    Some(remaining) => &available[..available.len().min(*remaining as usize)],
                    None => available,
                };
                let fed = capped.len();
                let before_in = decomp.total_in();
                let before_out = decomp.total_out();
                let status = decomp
                    .decompress(capped, buf, FlushDecompress::None)
                    .map_err(|e| Error::Corrupt {
                        format: "zip",
                        reason: format!("deflate error: {e}"),
                    })?;
                let consumed = (decomp.total_in() - before_in) as usize;
                let produced = (decomp.total_out() - before_out) as usize;
                source.consume(consumed);
                if let Some(remaining) = raw_remaining {
                    *remaining -= consumed as u64;
                }
                crc.update(&buf[..produced]);
                match status {
                    Status::StreamEnd => {
                        *done = true;
                        return Ok(produced);
                    }
                    _ if produced > 0 => return Ok(produced),
                    _ if fed == 0 => {
                        return Err(Error::Corrupt {
                            format: "zip",
                            reason: "truncated deflate stream".into(),
                        });
                    }
                    _ => continue,
                }
            }
        }
    }
}

impl ArchiveReader for ZipReader<'_> {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>> {
        if self.finished {
            return Ok(None);
        }
        self.finish_current()?;

        let mut sig = [0u8; 4];
        match self.source.read_exact(&mut sig) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // An entirely empty stream is not a zip; a stream ending at a
                // header boundary after entries is the central directory being
                // absent (tolerated).
                self.finished = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        let signature = u32::from_le_bytes(sig);
        match signature {
            LOCAL_HEADER_SIG => {}
            CENTRAL_HEADER_SIG | EOCD_SIG => {
                // First central record: local entries are exhausted.
                self.finished = true;
                return Ok(None);
            }
            other => {
                self.finished = true;
                return Err(Error::Corrupt {
                    format: "zip",
                    reason: format!("bad header signature {other:#010x}"),
                });
            }
        }

        let mut fixed = [0u8; 26];
        if let Err(e) = self.source.read_exact(&mut fixed) {
            self.finished = true;
            return Err(e.into());
        }
        let flags = u16::from_le_bytes([fixed[2], fixed[3]]);
        let method = u16::from_le_bytes([fixed[4], fixed[5]]);
        let dos_time = u16::from_le_bytes([fixed[6], fixed[7]]);
        let dos_date = u16::from_le_bytes([fixed[8], fixed[9]]);
        let declared_crc = u32::from_le_bytes([fixed[10], fixed[11], fixed[12], fixed[13]]);
        let compressed_size =
            u32::from_le_bytes([fixed[14], fixed[15], fixed[16], fixed[17]]) as u64;
        let uncompressed_size =
            u32::from_le_bytes([fixed[18], fixed[19], fixed[20], fixed[21]]) as u64;
        let name_len = u16::from_le_bytes([fixed[22], fixed[23]]) as usize;
        let extra_len = u16::from_le_bytes([fixed[24], fixed[25]]) as usize;

        let mut name_bytes = vec![0u8; name_len];
        if let Err(e) = self
            .source
            .read_exact(&mut name_bytes)
            .and_then(|()| self.source.skip(extra_len as u64))
        {
            self.finished = true;
            return Err(e.into());
        }

        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        if flags & FLAG_UTF8 == 0 && !name_bytes.is_ascii() {
            log::debug!("zip entry name '{name}' is not flagged UTF-8; decoded lossily");
        }

        let has_descriptor = flags & FLAG_DESCRIPTOR != 0;

        // Reject what this reader cannot represent, skipping the entry when
        // the header tells us how far.
        let unsupported = if flags & FLAG_ENCRYPTED != 0 {
            Some("encryption")
        } else if compressed_size == u32::MAX as u64 || uncompressed_size == u32::MAX as u64 {
            Some("zip64")
        } else if method != METHOD_STORED && method != METHOD_DEFLATE {
            Some("compression method")
        } else if method == METHOD_STORED && has_descriptor {
            Some("stored entry with data descriptor")
        } else {
            None
        };
        if let Some(feature) = unsupported {
            if has_descriptor {
                // No way to find the entry boundary; give up on the stream.
                self.finished = true;
            } else {
                self.source.skip(compressed_size)?;
            }
            return Err(Error::UnsupportedEntry {
                entry: name,
                feature: feature.into(),
            });
        }

        let is_directory = name.ends_with('/');
        let entry_name = name.trim_end_matches('/').to_string();
        let modified = dos_to_system_time(dos_date, dos_time);

        self.state = if method == METHOD_STORED {
            EntryState::Stored {
                remaining: compressed_size,
                crc: Crc32::new(),
                declared_crc,
                name: entry_name.clone(),
            }
        } else {
            EntryState::Deflate {
                decomp: Box::new(Decompress::new(false)),
                raw_remaining: (!has_descriptor).then_some(compressed_size),
                done: false,
                crc: Crc32::new(),
                declared_crc: (!has_descriptor).then_some(declared_crc),
                has_descriptor,
                name: entry_name.clone(),
            }
        };

        let size = if is_directory {
            0
        } else if has_descriptor {
            -1
        } else {
            uncompressed_size as i64
        };

        Ok(Some(ArchiveEntry {
            name: entry_name,
            is_directory,
            size,
            modified,
            crc: (!has_descriptor).then_some(declared_crc),
            mode: None,
            uid: None,
            gid: None,
            stream: Box::new(EntryStream { reader: self }),
        }))
    }
}

/// The lending stream of the current entry.
struct EntryStream<'a, 'r> {
    reader: &'a mut ZipReader<'r>,
}

impl Read for EntryStream<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_entry_data(&mut self.reader.source, &mut self.reader.state, buf)
            .map_err(io::Error::other)
    }
}

/// Converts MS-DOS date/time fields to a `SystemTime` (UTC interpretation).
fn dos_to_system_time(date: u16, time: u16) -> Option<SystemTime> {
    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(Utc.from_utc_datetime(&naive).into())
}

/// Converts a `SystemTime` to MS-DOS (date, time) fields.
fn system_time_to_dos(time: SystemTime) -> (u16, u16) {
    let dt = chrono::DateTime::<Utc>::from(time);
    let year = dt.year().clamp(1980, 2107);
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let dos_time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, dos_time)
}

struct CentralRecord {
    name: String,
    method: u16,
    dos_date: u16,
    dos_time: u16,
    crc: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    offset: u32,
    is_directory: bool,
}

/// ZIP writer.
///
/// Per-entry compressed data is buffered in memory so local headers carry
/// final sizes; no data descriptors are emitted and the output never needs
/// seeking. [`finish`](Self::finish) writes the central directory and must be
/// called exactly once (it is idempotent).
pub struct ZipWriter<W: Write> {
    out: W,
    offset: u64,
    central: Vec<CentralRecord>,
    finished: bool,
}

impl<W: Write> ZipWriter<W> {
    /// Creates a writer emitting to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            central: Vec::new(),
            finished: false,
        }
    }

    /// Appends a file entry, consuming `contents`.
    pub fn add_entry(
        &mut self,
        name: &str,
        modified: Option<SystemTime>,
        contents: &mut dyn Read,
    ) -> Result<()> {
        let mut data = Vec::new();
        contents.read_to_end(&mut data)?;
        let crc = Crc32::compute(&data);

        let mut deflated = Vec::new();
        {
            let mut encoder =
                flate2::write::DeflateEncoder::new(&mut deflated, Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
        }
        // Store incompressible data as-is, like every zip tool does.
        let (method, payload) = if deflated.len() < data.len() {
            (METHOD_DEFLATE, deflated)
        } else {
            (METHOD_STORED, data.clone())
        };

        self.write_entry(name, modified, method, crc, &payload, data.len(), false)
    }

    /// Appends a directory entry (name gains a trailing `/`).
    pub fn add_directory(&mut self, name: &str, modified: Option<SystemTime>) -> Result<()> {
        let name = format!("{}/", name.trim_end_matches('/'));
        self.write_entry(&name, modified, METHOD_STORED, 0, &[], 0, true)
    }

    /// Returns how many entries have been added.
    pub fn entries_written(&self) -> usize {
        self.central.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn write_entry(
        &mut self,
        name: &str,
        modified: Option<SystemTime>,
        method: u16,
        crc: u32,
        payload: &[u8],
        uncompressed_len: usize,
        is_directory: bool,
    ) -> Result<()> {
        if self.finished {
            return Err(Error::Config("zip writer already finished".into()));
        }
        let offset = u32::try_from(self.offset).map_err(|_| Error::UnsupportedEntry {
            entry: name.into(),
            feature: "archive larger than 4 GiB (zip64)".into(),
        })?;
        let compressed_size =
            u32::try_from(payload.len()).map_err(|_| Error::UnsupportedEntry {
                entry: name.into(),
                feature: "entry larger than 4 GiB (zip64)".into(),
            })?;
        let uncompressed_size =
            u32::try_from(uncompressed_len).map_err(|_| Error::UnsupportedEntry {
                entry: name.into(),
                feature: "entry larger than 4 GiB (zip64)".into(),
            })?;

        let (dos_date, dos_time) =
            modified.map(system_time_to_dos).unwrap_or((0x21, 0)); // 1980-01-01

        let name_bytes = name.as_bytes();
        let mut header = Vec::with_capacity(30 + name_bytes.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&20u16.to_le_bytes()); // version needed
        header.extend_from_slice(&FLAG_UTF8.to_le_bytes());
        header.extend_from_slice(&method.to_le_bytes());
        header.extend_from_slice(&dos_time.to_le_bytes());
        header.extend_from_slice(&dos_date.to_le_bytes());
        header.extend_from_slice(&crc.to_le_bytes());
        header.extend_from_slice(&compressed_size.to_le_bytes());
        header.extend_from_slice(&uncompressed_size.to_le_bytes());
        header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes()); // extra len
        header.extend_from_slice(name_bytes);

        self.out.write_all(&header)?;
        self.out.write_all(payload)?;
        self.offset += header.len() as u64 + payload.len() as u64;

        self.central.push(CentralRecord {
            name: name.to_string(),
            method,
            dos_date,
            dos_time,
            crc,
            compressed_size,
            uncompressed_size,
            offset,
            is_directory,
        });
        Ok(())
    }

    /// Writes the central directory and end record. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let central_offset = self.offset;
        let mut central_size = 0u64;
        for record in &self.central {
            let name_bytes = record.name.as_bytes();
            let mut header = Vec::with_capacity(46 + name_bytes.len());
            header.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            header.extend_from_slice(&(20u16 | (3 << 8)).to_le_bytes()); // made by: unix
            header.extend_from_slice(&20u16.to_le_bytes()); // version needed
            header.extend_from_slice(&FLAG_UTF8.to_le_bytes());
            header.extend_from_slice(&record.method.to_le_bytes());
            header.extend_from_slice(&record.dos_time.to_le_bytes());
            header.extend_from_slice(&record.dos_date.to_le_bytes());
            header.extend_from_slice(&record.crc.to_le_bytes());
            header.extend_from_slice(&record.compressed_size.to_le_bytes());
            header.extend_from_slice(&record.uncompressed_size.to_le_bytes());
            header.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes()); // extra len
            header.extend_from_slice(&0u16.to_le_bytes()); // comment len
            header.extend_from_slice(&0u16.to_le_bytes()); // disk number
            header.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            let mode: u32 = if record.is_directory { 0o040755 } else { 0o100644 };
            header.extend_from_slice(&(mode << 16).to_le_bytes()); // external attrs
            header.extend_from_slice(&record.offset.to_le_bytes());
            header.extend_from_slice(name_bytes);
            self.out.write_all(&header)?;
            central_size += header.len() as u64;
        }

        let count = self.central.len() as u16;
        let mut eocd = Vec::with_capacity(22);
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // disk number
        eocd.extend_from_slice(&0u16.to_le_bytes()); // central dir disk
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&(central_size as u32).to_le_bytes());
        eocd.extend_from_slice(&(central_offset as u32).to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // comment len
        self.out.write_all(&eocd)?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }
}
