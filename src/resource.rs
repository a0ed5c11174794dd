//! Uniform access to filesystem files, directories, and URL resources.
//!
//! The traversal engine reads everything through this layer: directory
//! listings (sanitised and ordered), file streams, metadata, and
//! URL-addressed resources. `file:` URLs are resolved built-in; other schemes
//! go through openers registered with [`Resources::register_opener`], so the
//! engine stays free of protocol dependencies.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::{Error, Result};

/// Host-specific filename escape substitutions.
///
/// Some platforms store characters that are illegal in their native filenames
/// as private-use codepoints; on listing, those are mapped back. The default
/// map restores `U+F03A` to `:`. The mapping is configuration, not behavior:
/// platforms that use different codepoints get a different table.
#[derive(Debug, Clone)]
pub struct SanitizeMap {
    map: Vec<(char, char)>,
}

impl Default for SanitizeMap {
    fn default() -> Self {
        Self {
            map: vec![('\u{F03A}', ':')],
        }
    }
}

impl SanitizeMap {
    /// Creates an empty map (no substitution).
    pub fn none() -> Self {
        Self { map: Vec::new() }
    }

    /// Creates a map from explicit pairs.
    pub fn from_pairs(pairs: &[(char, char)]) -> Self {
        Self {
            map: pairs.to_vec(),
        }
    }

    /// Applies the substitutions to one child name.
    pub fn apply(&self, name: &str) -> String {
        if self.map.is_empty() {
            return name.to_string();
        }
        name.chars()
            .map(|c| {
                self.map
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map(|(_, to)| *to)
                    .unwrap_or(c)
            })
            .collect()
    }
}

/// Ordering applied to a directory's member listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameOrdering {
    /// Collation-style ordering: case-insensitive, byte order as tiebreak.
    #[default]
    Collated,
    /// Plain byte order.
    CaseSensitive,
    /// Whatever order the OS reports.
    Os,
}

impl NameOrdering {
    fn sort(&self, names: &mut [String]) {
        match self {
            NameOrdering::Collated => {
                names.sort_by(|a, b| {
                    a.to_lowercase()
                        .cmp(&b.to_lowercase())
                        .then_with(|| a.cmp(b))
                });
            }
            NameOrdering::CaseSensitive => names.sort(),
            NameOrdering::Os => {}
        }
    }

    fn sort_children(&self, children: &mut [DirChild]) {
        match self {
            NameOrdering::Collated => {
                children.sort_by(|a, b| {
                    a.name
                        .to_lowercase()
                        .cmp(&b.name.to_lowercase())
                        .then_with(|| a.name.cmp(&b.name))
                });
            }
            NameOrdering::CaseSensitive => children.sort_by(|a, b| a.name.cmp(&b.name)),
            NameOrdering::Os => {}
        }
    }
}

/// One directory member, before and after sanitisation.
#[derive(Debug, Clone)]
pub struct DirChild {
    /// The name as the OS reports it; use this to open the child.
    pub raw: std::ffi::OsString,
    /// The sanitised name; use this in traversal paths and globs.
    pub name: String,
}

/// Metadata of a filesystem node, as surfaced into the property map.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Size in bytes (0 for directories).
    pub size: i64,
    /// Last modification time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
    /// Whether the node is a directory.
    pub is_dir: bool,
    /// Readable by the current process (approximated from mode bits).
    pub readable: bool,
    /// Writable by the current process.
    pub writable: bool,
    /// Has an execute bit set (always `false` on non-Unix).
    pub executable: bool,
    /// Raw Unix mode bits, when available.
    pub mode: Option<u32>,
}

/// An opened URL resource.
pub struct UrlResource {
    /// The content stream; owns its descriptor/connection.
    pub stream: Box<dyn Read>,
    /// Content length, `-1` when the server does not provide one.
    pub size: i64,
    /// Last-modified time, when provided.
    pub modified: Option<SystemTime>,
}

impl std::fmt::Debug for UrlResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlResource")
            .field("size", &self.size)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Opens resources for a URL scheme.
pub trait UrlOpener {
    /// Opens the resource addressed by `url` (full URL, scheme included).
    fn open(&self, url: &str) -> Result<UrlResource>;
}

/// The resource layer configuration: sanitisation, ordering, URL openers.
pub struct Resources {
    sanitize: SanitizeMap,
    ordering: NameOrdering,
    openers: HashMap<String, Box<dyn UrlOpener>>,
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}

impl Resources {
    /// Creates the default layer: `U+F03A → :` sanitisation, collated
    /// ordering, `file:` URLs only.
    pub fn new() -> Self {
        Self {
            sanitize: SanitizeMap::default(),
            ordering: NameOrdering::default(),
            openers: HashMap::new(),
        }
    }

    /// Replaces the sanitisation table.
    #[must_use]
    pub fn sanitize_map(mut self, map: SanitizeMap) -> Self {
        self.sanitize = map;
        self
    }

    /// Replaces the member ordering.
    #[must_use]
    pub fn ordering(mut self, ordering: NameOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Registers an opener for a URL scheme (e.g. `"http"`).
    pub fn register_opener(&mut self, scheme: &str, opener: Box<dyn UrlOpener>) {
        self.openers.insert(scheme.to_lowercase(), opener);
    }

    /// Lists, sanitises, and orders the children of a directory.
    ///
    /// Each child is returned as `(raw OS name, sanitised display name)`: the
    /// raw name is what the filesystem must be asked for, the sanitised one
    /// is what traversal paths and globs see.
    pub fn list_children(&self, dir: &Path) -> Result<Vec<DirChild>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let raw = entry.file_name();
            let name = self.sanitize.apply(&raw.to_string_lossy());
            children.push(DirChild { raw, name });
        }
        self.ordering.sort_children(&mut children);
        Ok(children)
    }

    /// Opens a regular file for reading. The stream owns its descriptor.
    pub fn open_file(&self, path: &Path) -> Result<File> {
        Ok(File::open(path)?)
    }

    /// Reads filesystem metadata for a path.
    pub fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let meta = fs::metadata(path)?;
        Ok(Self::meta_from(&meta))
    }

    fn meta_from(meta: &fs::Metadata) -> FileMeta {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(meta.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode: Option<u32> = None;

        FileMeta {
            size: if meta.is_dir() { 0 } else { meta.len() as i64 },
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
            readable: mode.map(|m| m & 0o444 != 0).unwrap_or(true),
            writable: !meta.permissions().readonly(),
            executable: mode.map(|m| m & 0o111 != 0).unwrap_or(false),
            mode,
        }
    }

    /// Returns whether `spec` looks like a URL this layer could open.
    pub fn is_url(spec: &str) -> bool {
        split_scheme(spec).is_some()
    }

    /// Opens a URL resource. `file:` is handled built-in; other schemes are
    /// dispatched to registered openers.
    pub fn open_url(&self, url: &str) -> Result<UrlResource> {
        let (scheme, rest) = split_scheme(url).ok_or_else(|| {
            Error::Config(format!("'{url}' is not a URL"))
        })?;
        match scheme.to_lowercase().as_str() {
            "file" => {
                let path = file_url_path(rest);
                let meta = self.metadata(&path)?;
                let stream = self.open_file(&path)?;
                Ok(UrlResource {
                    stream: Box::new(stream),
                    size: meta.size,
                    modified: meta.modified,
                })
            }
            other => match self.openers.get(other) {
                Some(opener) => opener.open(url),
                None => Err(Error::Config(format!(
                    "no opener registered for URL scheme '{other}'"
                ))),
            },
        }
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("sanitize", &self.sanitize)
            .field("ordering", &self.ordering)
            .field("schemes", &self.openers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Splits `scheme:rest`, requiring an RFC 3986 scheme shape. Single letters
/// are not schemes (`C:\x` is a Windows path).
pub fn split_scheme(spec: &str) -> Option<(&str, &str)> {
    let colon = spec.find(':')?;
    if colon < 2 {
        return None;
    }
    let scheme = &spec[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme, &spec[colon + 1..]))
}

/// Extracts the filesystem path of a `file:` URL body (`//host/p` or `/p`).
fn file_url_path(rest: &str) -> PathBuf {
    let path = rest.strip_prefix("//").map_or(rest, |r| {
        // Skip the (usually empty) authority.
        match r.find('/') {
            Some(idx) => &r[idx..],
            None => r,
        }
    });
    PathBuf::from(path)
}
