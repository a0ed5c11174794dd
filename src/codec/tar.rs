//! POSIX ustar TAR reader and writer.
//!
//! The reader walks 512-byte header blocks sequentially and lends each
//! entry's data as a bounded stream; whatever the consumer leaves unread is
//! skipped (together with the block padding) on the next advance. The writer
//! emits ustar headers with correct checksums and terminates the archive with
//! two zero blocks.
//!
//! Extended headers (pax `x`/`g`, GNU `L`/`K` long names) are skipped with a
//! warning; the following real entry is still yielded with its base header
//! name. Link entries are yielded with empty contents.

use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{ArchiveEntry, ArchiveReader};
use crate::{Error, Result};

const BLOCK_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;

/// Streaming TAR reader.
pub struct TarReader<'r> {
    source: Box<dyn Read + 'r>,
    /// Unconsumed data bytes of the current entry.
    data_remaining: u64,
    /// Padding bytes after the current entry's data.
    padding: u64,
    finished: bool,
}

impl<'r> TarReader<'r> {
    /// Creates a reader over a raw tar byte stream.
    pub fn new(source: Box<dyn Read + 'r>) -> Self {
        Self {
            source,
            data_remaining: 0,
            padding: 0,
            finished: false,
        }
    }

    fn skip_current(&mut self) -> Result<()> {
        let to_skip = self.data_remaining + self.padding;
        self.data_remaining = 0;
        self.padding = 0;
        if to_skip > 0 {
            let copied = io::copy(&mut (&mut self.source).take(to_skip), &mut io::sink())?;
            if copied != to_skip {
                self.finished = true;
                return Err(Error::Corrupt {
                    format: "tar",
                    reason: format!("truncated entry data ({copied} of {to_skip} bytes)"),
                });
            }
        }
        Ok(())
    }

    /// Reads one header block. Returns `None` on clean EOF or terminator.
    fn read_header(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.source.read(&mut block[filled..])?;
            if n == 0 {
                if filled == 0 {
                    // EOF at a block boundary: archives without the trailing
                    // zero blocks are common enough to accept.
                    return Ok(None);
                }
                return Err(Error::Corrupt {
                    format: "tar",
                    reason: format!("truncated header ({filled} of {BLOCK_SIZE} bytes)"),
                });
            }
            filled += n;
        }
        if block.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        Ok(Some(block))
    }
}

impl ArchiveReader for TarReader<'_> {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry<'_>>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            self.skip_current()?;

            let block = match self.read_header()? {
                Some(block) => block,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };

            verify_checksum(&block)?;

            let typeflag = block[156];
            let size = parse_size(&block[124..136])?;
            let padding = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;

            match typeflag {
                b'x' | b'g' | b'L' | b'K' => {
                    log::warn!("skipping tar extended header (typeflag '{}')", typeflag as char);
                    self.data_remaining = size;
                    self.padding = padding;
                    continue;
                }
                _ => {}
            }

            let mut name = parse_string(&block[0..NAME_LEN]);
            let prefix = parse_string(&block[345..345 + PREFIX_LEN]);
            if !prefix.is_empty() {
                name = format!("{prefix}/{name}");
            }
            if name.is_empty() {
                return Err(Error::Corrupt {
                    format: "tar",
                    reason: "entry with empty name".into(),
                });
            }

            let is_directory = typeflag == b'5' || name.ends_with('/');
            let name = name.trim_end_matches('/').to_string();
            let is_link = matches!(typeflag, b'1' | b'2');

            let mode = parse_octal(&block[100..108]).ok().map(|m| (m & 0o7777) as u32);
            let uid = parse_octal(&block[108..116]).ok();
            let gid = parse_octal(&block[116..124]).ok();
            let modified = parse_octal(&block[136..148])
                .ok()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));

            // Directory and link entries carry no data even if a size slipped
            // into the header.
            let entry_size = if is_directory || is_link {
                self.data_remaining = size;
                self.padding = padding;
                self.skip_current()?;
                0
            } else {
                self.data_remaining = size;
                self.padding = padding;
                size as i64
            };

            let stream: Box<dyn Read + '_> = Box::new(EntryStream {
                source: &mut self.source,
                remaining: &mut self.data_remaining,
            });

            return Ok(Some(ArchiveEntry {
                name,
                is_directory,
                size: entry_size,
                modified,
                crc: None,
                mode,
                uid,
                gid,
                stream,
            }));
        }
    }
}

/// Bounded view of the current entry's data.
struct EntryStream<'a, 'r> {
    source: &'a mut Box<dyn Read + 'r>,
    remaining: &'a mut u64,
}

impl Read for EntryStream<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(*self.remaining as usize);
        let n = self.source.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated tar entry data",
            ));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}

/// Parses a NUL/space-terminated header string.
fn parse_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Parses an octal header field (NUL/space padded).
fn parse_octal(field: &[u8]) -> Result<u64> {
    let text = parse_string(field);
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(&text, 8).map_err(|_| Error::Corrupt {
        format: "tar",
        reason: format!("bad octal field '{text}'"),
    })
}

/// Parses the size field, accepting GNU base-256 for sizes over 8 GiB.
fn parse_size(field: &[u8]) -> Result<u64> {
    if field[0] & 0x80 != 0 {
        let mut value: u64 = (field[0] & 0x7F) as u64;
        for &b in &field[1..] {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(b as u64))
                .ok_or(Error::Corrupt {
                    format: "tar",
                    reason: "base-256 size overflow".into(),
                })?;
        }
        return Ok(value);
    }
    parse_octal(field)
}

/// Verifies the header checksum (byte sum with the checksum field as spaces).
fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> Result<()> {
    let declared = parse_octal(&block[148..156])?;
    let mut sum: u64 = 0;
    for (i, &b) in block.iter().enumerate() {
        sum += if (148..156).contains(&i) { b' ' as u64 } else { b as u64 };
    }
    if sum != declared {
        return Err(Error::Corrupt {
            format: "tar",
            reason: format!("header checksum mismatch (declared {declared}, computed {sum})"),
        });
    }
    Ok(())
}

/// Streaming TAR writer.
///
/// Entries are written as they are added; [`finish`](TarWriter::finish) emits
/// the two terminating zero blocks and must be called exactly once.
pub struct TarWriter<W: Write> {
    out: W,
    entries_written: u64,
    finished: bool,
}

impl<W: Write> TarWriter<W> {
    /// Creates a writer emitting to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            entries_written: 0,
            finished: false,
        }
    }

    /// Appends a file entry of known size, copying `contents`.
    pub fn add_entry(
        &mut self,
        name: &str,
        modified: Option<SystemTime>,
        size: u64,
        contents: &mut dyn Read,
    ) -> Result<()> {
        self.write_header(name, modified, size, b'0', 0o644)?;
        let copied = io::copy(&mut contents.take(size), &mut self.out)?;
        if copied != size {
            return Err(Error::Corrupt {
                format: "tar",
                reason: format!("entry '{name}': contents ended after {copied} of {size} bytes"),
            });
        }
        let padding = (BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64;
        self.out.write_all(&vec![0u8; padding as usize])?;
        self.entries_written += 1;
        Ok(())
    }

    /// Appends a directory entry.
    pub fn add_directory(&mut self, name: &str, modified: Option<SystemTime>) -> Result<()> {
        let name = format!("{}/", name.trim_end_matches('/'));
        self.write_header(&name, modified, 0, b'5', 0o755)?;
        self.entries_written += 1;
        Ok(())
    }

    /// Returns how many entries have been added.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Writes the archive terminator and flushes. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.out.write_all(&[0u8; BLOCK_SIZE])?;
        self.out.write_all(&[0u8; BLOCK_SIZE])?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }

    fn write_header(
        &mut self,
        name: &str,
        modified: Option<SystemTime>,
        size: u64,
        typeflag: u8,
        mode: u32,
    ) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];

        let (prefix, base) = split_name(name)?;
        block[..base.len()].copy_from_slice(base.as_bytes());
        block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());

        write_octal(&mut block[100..108], mode as u64);
        write_octal(&mut block[108..116], 0); // uid
        write_octal(&mut block[116..124], 0); // gid
        write_octal(&mut block[124..136], size);
        let mtime = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        write_octal(&mut block[136..148], mtime);
        block[156] = typeflag;
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");

        // Checksum: field counts as spaces.
        block[148..156].fill(b' ');
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        let digits = format!("{sum:06o}\0 ");
        block[148..156].copy_from_slice(digits.as_bytes());

        self.out.write_all(&block)?;
        Ok(())
    }
}

/// Splits a long name across the ustar prefix/name fields.
fn split_name(name: &str) -> Result<(&str, &str)> {
    if name.len() <= NAME_LEN {
        return Ok(("", name));
    }
    // Find a '/' so that the tail fits in name and the head in prefix.
    for (idx, _) in name.match_indices('/') {
        let (head, tail) = (&name[..idx], &name[idx + 1..]);
        if head.len() <= PREFIX_LEN && !tail.is_empty() && tail.len() <= NAME_LEN {
            return Ok((head, tail));
        }
    }
    Err(Error::UnsupportedEntry {
        entry: name.into(),
        feature: "name too long for ustar".into(),
    })
}

fn write_octal(field: &mut [u8], value: u64) {
    let digits = format!("{value:0width$o}", width = field.len() - 1);
    field[..digits.len()].copy_from_slice(digits.as_bytes());
    field[digits.len()] = 0;
}
