//! Container format detection.
//!
//! This module classifies a byte stream (plus an optional file-name hint) as
//! an archive, a compressed stream, or normal contents, based on magic bytes
//! with a file-extension fallback.
//!
//! Detection is non-destructive: [`classify`] takes the already-peeked prefix
//! of the stream and never consumes anything. Compressed formats are tried
//! before archive formats, because several archives travel gzipped
//! (`.tar.gz`) and must be unwrapped first. Ambiguous prefixes resolve to
//! [`Classification::Normal`] rather than failing; the traversal then treats
//! the node as textual contents.

use crate::glob::PatternList;

/// Archive formats the traversal can descend into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// ZIP archive (also jar, war, ear, apk).
    Zip,
    /// POSIX ustar TAR archive.
    Tar,
}

impl ArchiveFormat {
    /// Returns the lower-case format name used in properties and globs.
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Single-payload compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// gzip (RFC 1952), multi-member aware.
    Gzip,
    /// bzip2.
    Bzip2,
}

impl CompressionFormat {
    /// Returns the lower-case format name used in properties and globs.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Bzip2 => "bzip2",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The verdict of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The stream is an archive of the given format.
    Archive(ArchiveFormat),
    /// The stream is a compressed payload of the given format.
    Compressed(CompressionFormat),
    /// Plain contents (or nothing recognizable).
    Normal,
}

/// How many prefix bytes [`classify`] wants to see at most.
///
/// The TAR magic sits at offset 257; one 512-byte block covers every probe.
pub const PREFIX_LEN: usize = 512;

/// Compressed-format signatures, tried first.
const COMPRESSED_SIGNATURES: &[(&[u8], CompressionFormat)] = &[
    // gzip: 0x1F 0x8B
    (&[0x1F, 0x8B], CompressionFormat::Gzip),
    // bzip2: 'B' 'Z' 'h'
    (&[0x42, 0x5A, 0x68], CompressionFormat::Bzip2),
];

/// Archive signatures, tried after the compressed ones.
const ARCHIVE_SIGNATURES: &[(&[u8], ArchiveFormat)] = &[
    // ZIP: 'P' 'K' 0x03 0x04 (local file header)
    (&[0x50, 0x4B, 0x03, 0x04], ArchiveFormat::Zip),
    // ZIP: 'P' 'K' 0x05 0x06 (empty archive)
    (&[0x50, 0x4B, 0x05, 0x06], ArchiveFormat::Zip),
];

/// TAR USTAR signature at offset 257.
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

/// Classifies a stream prefix, optionally falling back on a name hint.
///
/// `prefix` is whatever the caller could peek without consuming, up to
/// [`PREFIX_LEN`] bytes; shorter prefixes simply skip the probes they cannot
/// satisfy. `hint` is the node name (used for extension fallback, e.g. a
/// pre-POSIX tar file with no magic).
///
/// # Example
///
/// ```rust
/// use spelunk::detect::{classify, ArchiveFormat, Classification, CompressionFormat};
///
/// assert_eq!(
///     classify(&[0x1F, 0x8B, 0x08, 0x00], Some("t.tar.gz")),
///     Classification::Compressed(CompressionFormat::Gzip),
/// );
/// assert_eq!(
///     classify(&[0x50, 0x4B, 0x03, 0x04], None),
///     Classification::Archive(ArchiveFormat::Zip),
/// );
/// assert_eq!(classify(b"hello", Some("notes.txt")), Classification::Normal);
/// ```
pub fn classify(prefix: &[u8], hint: Option<&str>) -> Classification {
    for (signature, format) in COMPRESSED_SIGNATURES {
        if prefix.len() >= signature.len() && prefix.starts_with(signature) {
            log::debug!("classified as compressed/{format} by signature");
            return Classification::Compressed(*format);
        }
    }

    for (signature, format) in ARCHIVE_SIGNATURES {
        if prefix.len() >= signature.len() && prefix.starts_with(signature) {
            log::debug!("classified as archive/{format} by signature");
            return Classification::Archive(*format);
        }
    }

    if prefix.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &prefix[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        log::debug!("classified as archive/tar by ustar magic");
        return Classification::Archive(ArchiveFormat::Tar);
    }

    if let Some(name) = hint {
        let by_ext = classify_extension(name);
        if by_ext != Classification::Normal {
            log::debug!("classified {name} as {by_ext:?} by extension");
            return by_ext;
        }
    }

    Classification::Normal
}

/// Classifies by file extension only.
///
/// Used as a fallback when no signature matched, and by callers that only
/// have a name (e.g. deciding the output format of the packer).
pub fn classify_extension(name: &str) -> Classification {
    let lower = name.to_lowercase();
    let ext = match lower.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => return Classification::Normal,
    };
    match ext {
        "zip" | "jar" | "war" | "ear" | "apk" => Classification::Archive(ArchiveFormat::Zip),
        "tar" => Classification::Archive(ArchiveFormat::Tar),
        "gz" | "tgz" => Classification::Compressed(CompressionFormat::Gzip),
        "bz2" | "tbz2" => Classification::Compressed(CompressionFormat::Bzip2),
        _ => Classification::Normal,
    }
}

/// The `--look-into` policy: decides whether the traversal descends into a
/// recognized container.
///
/// The subject matched against the globs is `"<format>:<path>"`, so
/// `--look-into 'zip:**'` descends only into ZIPs, and
/// `--look-into '**,~zip:**/huge.zip'` descends into everything except one
/// file. The default (empty) policy descends into every recognized format.
#[derive(Debug, Clone, Default)]
pub struct LookInto {
    globs: PatternList,
}

impl LookInto {
    /// Creates the default policy (descend into everything).
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a policy from an already-built pattern list.
    pub fn from_list(globs: PatternList) -> Self {
        Self { globs }
    }

    /// Returns whether the engine should descend into `path`, which was
    /// classified as `format`.
    pub fn descend(&self, format: &str, path: &str) -> bool {
        self.globs.matches(&format!("{format}:{path}"))
    }
}
