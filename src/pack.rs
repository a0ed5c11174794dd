//! Archive emission from traversal visitors.
//!
//! A [`Packer`] consumes `(entry name, mtime, size, contents)` records — most
//! conveniently whole [`Node`]s — and writes them into a new archive. Entry
//! names derive from traversal paths: OS separators become `/`, the `!`
//! archive markers become `/` (archives in archives turn into directory
//! prefixes), and the `%` compressed markers are deleted. An ordered list of
//! [`RenameRule`]s is applied to each derived name; the first matching rule
//! rewrites it.
//!
//! The output format follows the target file name: `.zip`/`.jar`-family
//! extensions write ZIP, `.tar` writes TAR, `.tar.gz`/`.tgz` writes a gzipped
//! TAR. The packer owns the underlying format writer and closes it exactly
//! once in [`finish`](Packer::finish).

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use crate::codec::{TarWriter, ZipWriter};
use crate::detect::{ArchiveFormat, Classification};
use crate::glob::Pattern;
use crate::props::Value;
use crate::walk::Node;
use crate::{Error, Result};

/// One `glob=replacement` rename rule.
///
/// The replacement may reference wildcard captures as `$1`..`$n`.
#[derive(Debug, Clone)]
pub struct RenameRule {
    pattern: Pattern,
    replacement: String,
}

impl RenameRule {
    /// Parses `glob=replacement` syntax.
    pub fn parse(spec: &str) -> Result<Self> {
        let (glob, replacement) = spec.split_once('=').ok_or_else(|| {
            Error::Config(format!("rename rule '{spec}' is not 'glob=replacement'"))
        })?;
        Ok(Self {
            pattern: Pattern::new(glob)?,
            replacement: replacement.to_string(),
        })
    }

    fn apply(&self, name: &str) -> Option<String> {
        self.pattern.rewrite(name, &self.replacement)
    }
}

/// Derives an archive entry name from a traversal path.
pub fn derive_entry_name(path: &str) -> String {
    let mut name = path.replace(std::path::MAIN_SEPARATOR, "/");
    name = name.replace('!', "/");
    name.retain(|c| c != '%');
    // Archive names are always relative.
    name.trim_start_matches('/').to_string()
}

enum Sink<'w> {
    Zip(ZipWriter<Box<dyn Write + 'w>>),
    Tar(TarWriter<Box<dyn Write + 'w>>),
}

/// Writes traversal output into a new archive.
pub struct Packer<'w> {
    sink: Sink<'w>,
    renames: Vec<RenameRule>,
    entries_written: u64,
    finished: bool,
}

impl<'w> Packer<'w> {
    /// Creates a packer writing to `path`, choosing the format from the file
    /// name.
    pub fn create_path(path: &Path, renames: Vec<RenameRule>) -> Result<Packer<'static>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file: Box<dyn Write> = Box::new(BufWriter::new(File::create(path)?));
        Packer::create(&name, file, renames)
    }

    /// Creates a packer writing to an arbitrary sink, choosing the format
    /// from `name`.
    pub fn create(name: &str, out: Box<dyn Write + 'w>, renames: Vec<RenameRule>) -> Result<Self> {
        let sink = match crate::detect::classify_extension(name) {
            Classification::Archive(ArchiveFormat::Zip) => Sink::Zip(ZipWriter::new(out)),
            Classification::Archive(ArchiveFormat::Tar) => Sink::Tar(TarWriter::new(out)),
            #[cfg(feature = "gzip")]
            Classification::Compressed(crate::detect::CompressionFormat::Gzip) => {
                // .tar.gz / .tgz: a tar stream behind a gzip encoder.
                Sink::Tar(TarWriter::new(crate::codec::gzip_encoder(out)))
            }
            _ => {
                return Err(Error::Config(format!(
                    "cannot infer an archive format from '{name}'"
                )));
            }
        };
        Ok(Self {
            sink,
            renames,
            entries_written: 0,
            finished: false,
        })
    }

    /// Resolves the final entry name for a traversal path.
    fn entry_name(&self, path: &str) -> String {
        let derived = derive_entry_name(path);
        for rule in &self.renames {
            if let Some(renamed) = rule.apply(&derived) {
                return renamed;
            }
        }
        derived
    }

    /// Adds one entry. `size < 0` means unknown (the contents are buffered
    /// where the format needs a size up front).
    pub fn add(
        &mut self,
        path: &str,
        modified: Option<SystemTime>,
        size: i64,
        contents: &mut dyn Read,
    ) -> Result<()> {
        if self.finished {
            return Err(Error::Config("packer already finished".into()));
        }
        let name = self.entry_name(path);
        if name.is_empty() {
            return Err(Error::Config(format!(
                "path '{path}' derives an empty entry name"
            )));
        }
        match &mut self.sink {
            Sink::Zip(writer) => writer.add_entry(&name, modified, contents)?,
            Sink::Tar(writer) => {
                if size >= 0 {
                    writer.add_entry(&name, modified, size as u64, contents)?;
                } else {
                    let mut data = Vec::new();
                    contents.read_to_end(&mut data)?;
                    writer.add_entry(&name, modified, data.len() as u64, &mut &data[..])?;
                }
            }
        }
        self.entries_written += 1;
        Ok(())
    }

    /// Adds a visited node: takes its contents stream and carries its
    /// mtime. Nodes without consumable contents (directories, containers
    /// being descended into) are skipped.
    pub fn add_node(&mut self, node: &mut Node<'_>) -> Result<()> {
        if !node.has_contents() {
            return Ok(());
        }
        let modified = node.get("lastModifiedDate")?.and_then(|v| v.as_date());
        let size = match node.props().get("size")? {
            Some(Value::Int(size)) => size,
            _ => -1,
        };
        let path = node.path().to_string();
        let mut stream = node.take_stream()?;
        self.add(&path, modified, size, &mut stream)
    }

    /// How many entries have been written so far.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Closes the archive. Must be called; dropping an unfinished packer
    /// loses the trailer. Idempotent.
    pub fn finish(&mut self) -> Result<u64> {
        if !self.finished {
            match &mut self.sink {
                Sink::Zip(writer) => writer.finish()?,
                Sink::Tar(writer) => writer.finish()?,
            }
            self.finished = true;
        }
        Ok(self.entries_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ArchiveReader, ZipReader};
    use crate::walk::{Visitor, Walker};
    use std::fs;
    use std::io::Write as _;

    #[test]
    fn test_derive_entry_name() {
        assert_eq!(derive_entry_name("a/b.txt"), "a/b.txt");
        assert_eq!(
            derive_entry_name("dist/app.tar.gz%!lib/foo.jar!x/y.class"),
            "dist/app.tar.gz/lib/foo.jar/x/y.class"
        );
        assert_eq!(derive_entry_name("/abs/path"), "abs/path");
        assert_eq!(derive_entry_name("t.gz%"), "t.gz");
    }

    #[test]
    fn test_rename_rule() {
        let rule = RenameRule::parse("**.class=classes/$1.class").unwrap();
        assert_eq!(
            rule.apply("com/x/Main.class"),
            Some("classes/com/x/Main.class".to_string())
        );
        assert_eq!(rule.apply("readme.txt"), None);
        assert!(RenameRule::parse("no-equals-sign").is_err());
    }

    #[test]
    fn test_first_matching_rename_wins() {
        let mut packer = Packer::create(
            "out.zip",
            Box::new(Vec::new()),
            vec![
                RenameRule::parse("**.txt=first/$1.txt").unwrap(),
                RenameRule::parse("**=second/$1").unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(packer.entry_name("a.txt"), "first/a.txt");
        assert_eq!(packer.entry_name("a.bin"), "second/a.bin");
        packer.finish().unwrap();
    }

    #[test]
    fn test_format_from_name() {
        assert!(Packer::create("x.zip", Box::new(Vec::new()), vec![]).is_ok());
        assert!(Packer::create("x.jar", Box::new(Vec::new()), vec![]).is_ok());
        assert!(Packer::create("x.tar", Box::new(Vec::new()), vec![]).is_ok());
        assert!(Packer::create("x.tgz", Box::new(Vec::new()), vec![]).is_ok());
        assert!(Packer::create("x.dat", Box::new(Vec::new()), vec![]).is_err());
    }

    /// Walks a scratch tree into a zip, reads the zip back, and compares the
    /// `(entry name, contents)` sets.
    #[test]
    fn test_pack_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("sub/b.bin"), b"beta").unwrap();

        let zip_path = dir.path().join("out.zip");
        {
            struct Pack<'a, 'w> {
                packer: &'a mut Packer<'w>,
            }
            impl Visitor for Pack<'_, '_> {
                fn visit(&mut self, node: &mut Node<'_>) -> crate::Result<()> {
                    self.packer.add_node(node)
                }
            }
            let mut packer = Packer::create_path(&zip_path, vec![]).unwrap();
            let mut visitor = Pack {
                packer: &mut packer,
            };
            Walker::new().scan_path(&root, &mut visitor).unwrap();
            assert_eq!(packer.finish().unwrap(), 2);
        }

        let bytes = fs::read(&zip_path).unwrap();
        let mut reader = ZipReader::new(Box::new(&bytes[..]));
        let mut found = Vec::new();
        while let Some(mut entry) = reader.next_entry().unwrap() {
            let mut data = Vec::new();
            entry.stream.read_to_end(&mut data).unwrap();
            found.push((entry.name.clone(), data));
        }
        found.sort();

        let prefix = format!("{}/", root.display()).replace(std::path::MAIN_SEPARATOR, "/");
        let mut expected = vec![
            (format!("{prefix}a.txt"), b"alpha".to_vec()),
            (format!("{prefix}sub/b.bin"), b"beta".to_vec()),
        ];
        // Entry names keep the root prefix (the traversal path); normalize
        // both sides for comparison.
        expected.sort();
        let expected: Vec<(String, Vec<u8>)> = expected
            .into_iter()
            .map(|(n, d)| (n.trim_start_matches('/').to_string(), d))
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_nested_archive_becomes_directory_prefix() {
        // Pack the entries of a zip-in-dir traversal: entry paths with `!`
        // must become plain directory prefixes.
        let mut inner = Vec::new();
        let mut writer = ZipWriter::new(&mut inner);
        writer.add_entry("x/y.txt", None, &mut &b"nested"[..]).unwrap();
        writer.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("c.zip"), &inner).unwrap();

        let mut out = Vec::new();
        {
            let mut packer =
                Packer::create("repacked.zip", Box::new(&mut out), vec![]).unwrap();
            let mut visitor = |node: &mut Node<'_>| packer.add_node(node);
            Walker::new().scan_path(&root, &mut visitor).unwrap();
            packer.finish().unwrap();
        }

        let mut reader = ZipReader::new(Box::new(&out[..]));
        let entry = reader.next_entry().unwrap().expect("one entry");
        assert!(
            entry.name.ends_with("c.zip/x/y.txt"),
            "bang became slash: {}",
            entry.name
        );
        assert!(!entry.name.contains('!'));
    }

    #[test]
    fn test_tar_output_with_unknown_size_buffers() {
        let mut out = Vec::new();
        {
            let mut packer = Packer::create("t.tar", Box::new(&mut out), vec![]).unwrap();
            packer
                .add("streamed", None, -1, &mut &b"buffered body"[..])
                .unwrap();
            packer.finish().unwrap();
        }
        let mut reader = crate::codec::TarReader::new(Box::new(&out[..]));
        let mut entry = reader.next_entry().unwrap().expect("entry");
        assert_eq!(entry.name, "streamed");
        assert_eq!(entry.size, 13);
        let mut data = Vec::new();
        entry.stream.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"buffered body");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_tgz_output_is_gzipped_tar() {
        let mut out = Vec::new();
        {
            let mut packer = Packer::create("t.tgz", Box::new(&mut out), vec![]).unwrap();
            packer.add("f", None, 1, &mut &b"x"[..]).unwrap();
            packer.finish().unwrap();
        }
        assert_eq!(&out[..2], &[0x1F, 0x8B], "gzip magic");
        let decompressed = crate::codec::open_decompressor(
            crate::detect::CompressionFormat::Gzip,
            Box::new(&out[..]),
        )
        .unwrap();
        let mut reader = crate::codec::TarReader::new(decompressed);
        let entry = reader.next_entry().unwrap().expect("entry");
        assert_eq!(entry.name, "f");
    }

    #[test]
    fn test_add_after_finish_rejected() {
        let mut packer = Packer::create("x.zip", Box::new(Vec::new()), vec![]).unwrap();
        packer.finish().unwrap();
        let err = packer.add("late", None, 0, &mut &b""[..]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_entry_name_rejected() {
        let mut packer = Packer::create("x.zip", Box::new(Vec::new()), vec![]).unwrap();
        let err = packer.add("%", None, 0, &mut &b""[..]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        packer.finish().unwrap();
    }
}
