//! Round-trip tests for the archive packer: walk a tree into an archive,
//! read the archive back, and compare `(entry name, contents hash)` sets.

#![cfg(all(feature = "zip", feature = "tar", feature = "gzip"))]

mod common;

use std::collections::BTreeSet;
use std::fs;

use common::write_file;
use sha2::Digest as _;
use spelunk::codec::{ArchiveReader, TarReader, ZipReader};
use spelunk::{Node, Packer, RenameRule, Result, Visitor, Walker};

fn hash(data: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(data))
}

/// Builds a scratch tree, returning `(root, expected name+hash set)` with
/// names relative to the root.
fn sample_tree() -> (tempfile::TempDir, BTreeSet<(String, String)>) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir_all(root.join("docs/deep")).unwrap();
    write_file(&root.join("readme.md"), b"# hello\n");
    write_file(&root.join("docs/a.txt"), b"alpha");
    write_file(&root.join("docs/deep/b.bin"), &[0u8, 1, 2, 3, 255]);

    let expected: BTreeSet<(String, String)> = [
        ("readme.md", b"# hello\n" as &[u8]),
        ("docs/a.txt", b"alpha"),
        ("docs/deep/b.bin", &[0u8, 1, 2, 3, 255]),
    ]
    .into_iter()
    .map(|(n, d)| (n.to_string(), hash(d)))
    .collect();
    (dir, expected)
}

struct Pack<'p, 'w> {
    packer: &'p mut Packer<'w>,
}

impl Visitor for Pack<'_, '_> {
    fn visit(&mut self, node: &mut Node<'_>) -> Result<()> {
        self.packer.add_node(node)
    }
}

/// Walks `root` into a packer, stripping the root prefix via a rename rule
/// so entry names are tree-relative.
fn pack_tree(root: &std::path::Path, name: &str, out: &mut Vec<u8>) {
    let prefix = format!("{}/", root.display()).replace(std::path::MAIN_SEPARATOR, "/");
    let prefix = prefix.trim_start_matches('/').to_string();
    let rename = RenameRule::parse(&format!("{prefix}**=$1")).unwrap();
    let mut packer = Packer::create(name, Box::new(out), vec![rename]).unwrap();
    let mut visitor = Pack {
        packer: &mut packer,
    };
    Walker::new().scan_path(root, &mut visitor).unwrap();
    packer.finish().unwrap();
}

#[test]
fn test_zip_roundtrip_preserves_names_and_hashes() {
    let (dir, expected) = sample_tree();
    let mut bytes = Vec::new();
    pack_tree(&dir.path().join("tree"), "out.zip", &mut bytes);

    let mut reader = ZipReader::new(Box::new(&bytes[..]));
    let mut found = BTreeSet::new();
    while let Some(mut entry) = reader.next_entry().unwrap() {
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry.stream, &mut data).unwrap();
        found.insert((entry.name.clone(), hash(&data)));
    }
    assert_eq!(found, expected);
}

#[test]
fn test_tar_roundtrip_preserves_names_and_hashes() {
    let (dir, expected) = sample_tree();
    let mut bytes = Vec::new();
    pack_tree(&dir.path().join("tree"), "out.tar", &mut bytes);

    let mut reader = TarReader::new(Box::new(&bytes[..]));
    let mut found = BTreeSet::new();
    while let Some(mut entry) = reader.next_entry().unwrap() {
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry.stream, &mut data).unwrap();
        found.insert((entry.name.clone(), hash(&data)));
    }
    assert_eq!(found, expected);
}

#[test]
fn test_repack_flattens_nested_archives() {
    // A zip inside the tree: its entries repack under a directory prefix.
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir_all(&root).unwrap();
    write_file(
        &root.join("bundle.zip"),
        &common::zip_bytes(&[("inner/one.txt", b"1"), ("two.txt", b"2")]),
    );

    let mut bytes = Vec::new();
    pack_tree(&root, "out.zip", &mut bytes);

    let mut reader = ZipReader::new(Box::new(&bytes[..]));
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        names.push(entry.name.clone());
    }
    names.sort();
    assert_eq!(names, vec!["bundle.zip/inner/one.txt", "bundle.zip/two.txt"]);
}

#[test]
fn test_pack_mtime_survives_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tree");
    fs::create_dir_all(&root).unwrap();
    write_file(&root.join("f.txt"), b"dated");
    let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(root.join("f.txt"), mtime).unwrap();

    let mut bytes = Vec::new();
    pack_tree(&root, "out.tar", &mut bytes);

    let mut reader = TarReader::new(Box::new(&bytes[..]));
    let entry = reader.next_entry().unwrap().expect("entry");
    let stamped = entry.modified.expect("mtime recorded");
    let stamped_secs = stamped
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(stamped_secs, 1_600_000_000);
}
