//! Shared test utilities for integration tests.
//!
//! Fixture builders for in-memory archives and scratch directory trees used
//! across the test files.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test
//! file compiles as a separate crate and may only use a subset of these
//! helpers.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use spelunk::codec::{TarWriter, ZipWriter};
use spelunk::{Node, Result, Visitor, Walker};

/// Builds an in-memory ZIP from `(name, contents)` pairs.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut writer = ZipWriter::new(&mut bytes);
    for (name, data) in entries {
        writer.add_entry(name, None, &mut &data[..]).unwrap();
    }
    writer.finish().unwrap();
    bytes
}

/// Builds an in-memory TAR from `(name, contents)` pairs.
pub fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut writer = TarWriter::new(&mut bytes);
    for (name, data) in entries {
        writer
            .add_entry(name, None, data.len() as u64, &mut &data[..])
            .unwrap();
    }
    writer.finish().unwrap();
    bytes
}

/// Gzips a byte slice.
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = flate2::write::GzEncoder::new(&mut out, flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap();
    out
}

/// Builds a `.tar.gz` holding the given entries.
pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    gzip_bytes(&tar_bytes(entries))
}

/// Writes the scenario tree: `a/b.txt` (3 bytes "hi\n") and `a/c.zip`
/// containing entry `inside.txt` (4 bytes "foo\n"). Returns the tempdir.
pub fn scenario_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    fs::create_dir(&a).unwrap();
    write_file(&a.join("b.txt"), b"hi\n");
    write_file(&a.join("c.zip"), &zip_bytes(&[("inside.txt", b"foo\n")]));
    dir
}

/// Creates a file with the given contents.
pub fn write_file(path: &Path, contents: &[u8]) {
    File::create(path).unwrap().write_all(contents).unwrap();
}

/// A visitor that records `(path, type, depth)` per visit.
#[derive(Default)]
pub struct Recorder {
    pub visits: Vec<(String, String, u32)>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.visits.iter().map(|(p, _, _)| p.clone()).collect()
    }

    pub fn types(&self) -> Vec<String> {
        self.visits.iter().map(|(_, t, _)| t.clone()).collect()
    }
}

impl Visitor for Recorder {
    fn visit(&mut self, node: &mut Node<'_>) -> Result<()> {
        self.visits.push((
            node.path().to_string(),
            node.node_type().to_string(),
            node.depth(),
        ));
        Ok(())
    }
}

/// Scans `root` with `walker`, returning visit paths relative to `base`.
pub fn scan_relative(walker: &Walker, base: &Path, root: &Path) -> Vec<String> {
    let mut recorder = Recorder::new();
    walker.scan_path(root, &mut recorder).unwrap();
    let prefix = format!("{}/", base.display());
    recorder
        .paths()
        .into_iter()
        .map(|p| p.strip_prefix(&prefix).unwrap_or(&p).to_string())
        .collect()
}
