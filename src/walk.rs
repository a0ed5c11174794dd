//! The recursive nested-container traversal engine.
//!
//! [`Walker`] descends through directories, archives, and compressed streams
//! to arbitrary nesting depth, classifying every resource it meets and
//! invoking a caller-supplied [`Visitor`] with a [`Node`] describing it.
//!
//! # Paths and types
//!
//! Traversal paths compose with `/` inside containers, `!` between an archive
//! and its entries, and `%` after a compressed stream, so a class file inside
//! a jar inside a gzipped tarball reads
//! `dist/app.tar.gz%!lib/foo.jar!x/y.class`.
//!
//! Node types compose the same way: a container's children inherit its type
//! as suffix, prefixed with their own classification. A `.gz` file on disk is
//! `compressed-file`; the tar stream inside it is `archive-compressed-file`;
//! a plain entry of that tar is `normal-archive-compressed-file`. Roots
//! contribute the base suffix: `file` for filesystem files, `contents` for
//! streams, `<scheme>-resource` for URLs; filesystem directories are
//! `directory` and archive entries flagged as directories are
//! `directory-entry`.
//!
//! # Ordering and termination
//!
//! Directory members are visited in the order of the configured
//! [`NameOrdering`]; archive entries in stream order. Early termination is
//! cooperative: a visitor returning [`Error::Stopped`] finishes the current
//! node normally, and setting the prune flag on a directory or archive node
//! suppresses its expansion.

use std::cell::Cell;
use std::io::{self, Read};
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

use crate::codec::{self, ArchiveEntry};
use crate::detect::{self, Classification, LookInto};
use crate::props::{PropertyMap, Value};
use crate::resource::Resources;
use crate::{Error, Result};

/// One node of the traversal, handed to the visitor.
///
/// The node owns its [`PropertyMap`] and, for leaf-like nodes, the contents
/// stream. The stream is one-shot: the first consumer takes it (this is what
/// makes contents-consuming actions mutually exclusive on a single visit).
pub struct Node<'n> {
    node_type: String,
    path: String,
    name: String,
    depth: u32,
    props: PropertyMap<'n>,
    stream: Option<Box<dyn Read + 'n>>,
    prune: Option<Rc<Cell<bool>>>,
}

impl<'n> Node<'n> {
    /// The composed node type (`normal-file`, `archive-compressed-file`, ...).
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// The traversal path (`a/c.zip!inside.txt`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last path component (may contain `/` for archive entries).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 0 for a root argument, +1 per directory, archive, or compressed layer.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The full property map of this node.
    pub fn props(&self) -> &PropertyMap<'n> {
        &self.props
    }

    /// Reads a property, materializing the lazy `size` if needed.
    ///
    /// Reading `size` on a node whose declared size is unknown (`-1`) drains
    /// the contents stream to count its bytes; afterwards the stream is gone,
    /// and contents-consuming actions on the same visit fail.
    pub fn get(&mut self, name: &str) -> Result<Option<Value>> {
        if name == "size" {
            return self.size().map(|s| Some(Value::Int(s)));
        }
        self.props.get(name)
    }

    /// Like [`get`](Self::get), rendered as a string; missing names read as
    /// the empty string.
    pub fn get_str(&mut self, name: &str) -> Result<String> {
        Ok(self.get(name)?.map(|v| v.render()).unwrap_or_default())
    }

    /// The node's size, draining the stream to count bytes when the container
    /// format did not declare it.
    pub fn size(&mut self) -> Result<i64> {
        match self.props.get("size")? {
            Some(Value::Int(-1)) => {
                let mut stream = self.take_stream()?;
                let counted = io::copy(&mut stream, &mut io::sink())? as i64;
                self.props.set("size", counted)?;
                Ok(counted)
            }
            Some(Value::Int(size)) => Ok(size),
            _ => Ok(0),
        }
    }

    /// Whether this node's contents are still available for consumption.
    pub fn has_contents(&self) -> bool {
        self.stream.is_some()
    }

    /// Takes the contents stream. The second taker gets an error, which is
    /// how mutually exclusive contents-consuming actions surface.
    pub fn take_stream(&mut self) -> Result<Box<dyn Read + 'n>> {
        self.stream.take().ok_or_else(|| Error::ContentsConsumed {
            path: self.path.clone(),
        })
    }

    /// Requests that the engine not descend into this node. Meaningful only
    /// on directories and archives; everywhere else it is accepted and
    /// ignored.
    pub fn set_prune(&self) {
        if let Some(cell) = &self.prune {
            cell.set(true);
        }
    }

    /// Whether this node carries a prune flag (directories and archives).
    pub fn can_prune(&self) -> bool {
        self.prune.is_some()
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.node_type)
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("has_contents", &self.stream.is_some())
            .finish()
    }
}

/// The traversal callback.
///
/// Returning [`Error::Stopped`] finishes the current node normally (early
/// termination); any other error propagates to the caller of the scan.
pub trait Visitor {
    /// Called once per visited node.
    fn visit(&mut self, node: &mut Node<'_>) -> Result<()>;
}

impl<F> Visitor for F
where
    F: for<'n> FnMut(&mut Node<'n>) -> Result<()>,
{
    fn visit(&mut self, node: &mut Node<'_>) -> Result<()> {
        self(node)
    }
}

/// What to do with a recoverable per-child failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Re-raise: the first failure terminates the traversal (default).
    #[default]
    Fail,
    /// Log a warning and continue with the next sibling.
    Warn,
    /// Continue silently.
    Ignore,
}

/// Counters returned by a completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// How many nodes the visitor saw.
    pub visited: u64,
    /// How many recoverable errors the error policy consumed.
    pub skipped_errors: u64,
}

/// Metadata carried into a node's property map.
#[derive(Debug, Clone, Default)]
struct NodeMeta {
    size: i64,
    modified: Option<SystemTime>,
    crc: Option<u32>,
    mode: Option<u32>,
    uid: Option<u64>,
    gid: Option<u64>,
    readable: Option<bool>,
    writable: Option<bool>,
    executable: Option<bool>,
}

impl NodeMeta {
    fn from_entry(entry: &ArchiveEntry<'_>) -> Self {
        Self {
            size: entry.size,
            modified: entry.modified,
            crc: entry.crc,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            ..Self::default()
        }
    }

    fn from_file(meta: &crate::resource::FileMeta) -> Self {
        Self {
            size: meta.size,
            modified: meta.modified,
            mode: meta.mode,
            readable: Some(meta.readable),
            writable: Some(meta.writable),
            executable: Some(meta.executable),
            ..Self::default()
        }
    }

    fn apply(&self, props: &mut PropertyMap<'_>) -> Result<()> {
        props.set("size", self.size)?;
        if let Some(modified) = self.modified {
            props.set("lastModifiedDate", modified)?;
        }
        if let Some(crc) = self.crc {
            props.set("crc", crc as i64)?;
        }
        if let Some(mode) = self.mode {
            props.set("mode", mode as i64)?;
        }
        if let Some(uid) = self.uid {
            props.set("userId", uid as i64)?;
        }
        if let Some(gid) = self.gid {
            props.set("groupId", gid as i64)?;
        }
        if let Some(readable) = self.readable {
            props.set("readable", readable)?;
        }
        if let Some(writable) = self.writable {
            props.set("writable", writable)?;
        }
        if let Some(executable) = self.executable {
            props.set("executable", executable)?;
        }
        Ok(())
    }
}

struct Ctx<'v> {
    visitor: &'v mut dyn Visitor,
    outcome: ScanOutcome,
}

/// The recursive traversal engine.
///
/// A `Walker` is immutable configuration: one instance may serve any number
/// of scans, concurrently from several threads, as long as callers do not
/// share visitors.
///
/// # Example
///
/// ```rust,no_run
/// use spelunk::{Node, Result, Walker};
///
/// fn list(root: &str) -> Result<()> {
///     let walker = Walker::new();
///     walker.scan_path(root.as_ref(), &mut |node: &mut Node| {
///         println!("{}", node.path());
///         Ok(())
///     })?;
///     Ok(())
/// }
/// ```
pub struct Walker {
    min_depth: u32,
    max_depth: i64,
    descendants_first: bool,
    look_into: LookInto,
    resources: Resources,
    error_policy: ErrorPolicy,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new()
    }
}

impl Walker {
    /// Creates a walker with default configuration: unlimited depth,
    /// containers first, descend into everything, fail on the first error.
    pub fn new() -> Self {
        Self {
            min_depth: 0,
            max_depth: i64::MAX,
            descendants_first: false,
            look_into: LookInto::all(),
            resources: Resources::new(),
            error_policy: ErrorPolicy::Fail,
        }
    }

    /// Suppresses visitor invocations at depths below `depth`.
    #[must_use]
    pub fn min_depth(mut self, depth: u32) -> Self {
        self.min_depth = depth;
        self
    }

    /// Stops descent at `depth`. Negative means the scan does nothing.
    #[must_use]
    pub fn max_depth(mut self, depth: i64) -> Self {
        self.max_depth = depth;
        self
    }

    /// Visits children before their container.
    #[must_use]
    pub fn descendants_first(mut self, yes: bool) -> Self {
        self.descendants_first = yes;
        self
    }

    /// Sets the `--look-into` policy.
    #[must_use]
    pub fn look_into(mut self, policy: LookInto) -> Self {
        self.look_into = policy;
        self
    }

    /// Replaces the resource layer (sanitisation, ordering, URL openers).
    #[must_use]
    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the recoverable-error policy.
    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Scans a filesystem root (file or directory).
    pub fn scan_path(&self, root: &Path, visitor: &mut dyn Visitor) -> Result<ScanOutcome> {
        let mut ctx = Ctx {
            visitor,
            outcome: ScanOutcome::default(),
        };
        if self.max_depth >= 0 {
            let node_path = root.to_string_lossy().into_owned();
            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| node_path.clone());
            self.walk_fs(root, &node_path, &name, 0, None, &mut ctx)?;
        }
        Ok(ctx.outcome)
    }

    /// Scans a byte stream root (e.g. standard input). The base type suffix
    /// is `contents`, so a plain text stream visits as `normal-contents`.
    pub fn scan_stream<'s>(
        &self,
        name: &str,
        stream: Box<dyn Read + 's>,
        visitor: &mut dyn Visitor,
    ) -> Result<ScanOutcome> {
        let mut ctx = Ctx {
            visitor,
            outcome: ScanOutcome::default(),
        };
        if self.max_depth >= 0 {
            self.walk_stream(
                stream,
                "contents",
                name,
                name,
                0,
                None,
                NodeMeta {
                    size: -1,
                    ..NodeMeta::default()
                },
                &mut ctx,
            )?;
        }
        Ok(ctx.outcome)
    }

    /// Scans a root argument as the CLI sees it: `-` is standard input, a
    /// URL goes through the resource layer, anything else is a path.
    pub fn scan_spec(&self, spec: &str, visitor: &mut dyn Visitor) -> Result<ScanOutcome> {
        if spec == "-" {
            return self.scan_stream("-", Box::new(io::stdin().lock()), visitor);
        }
        if Resources::is_url(spec) {
            return self.scan_url(spec, visitor);
        }
        self.scan_path(Path::new(spec), visitor)
    }

    /// Scans a URL root. The base type suffix is `<scheme>-resource`.
    pub fn scan_url(&self, url: &str, visitor: &mut dyn Visitor) -> Result<ScanOutcome> {
        let (scheme, _) = crate::resource::split_scheme(url)
            .ok_or_else(|| Error::Config(format!("'{url}' is not a URL")))?;
        let resource = self.resources.open_url(url)?;
        let mut ctx = Ctx {
            visitor,
            outcome: ScanOutcome::default(),
        };
        if self.max_depth >= 0 {
            let name = url.rsplit('/').next().unwrap_or(url).to_string();
            self.walk_stream(
                resource.stream,
                &format!("{}-resource", scheme.to_lowercase()),
                url,
                &name,
                0,
                None,
                NodeMeta {
                    size: resource.size,
                    modified: resource.modified,
                    ..NodeMeta::default()
                },
                &mut ctx,
            )?;
        }
        Ok(ctx.outcome)
    }

    /// Routes a recoverable failure through the error policy.
    fn handle(&self, err: Error, ctx: &mut Ctx<'_>) -> Result<()> {
        if !err.is_recoverable() {
            return Err(err);
        }
        match self.error_policy {
            ErrorPolicy::Fail => Err(err),
            ErrorPolicy::Warn => {
                log::warn!("{err}");
                ctx.outcome.skipped_errors += 1;
                Ok(())
            }
            ErrorPolicy::Ignore => {
                ctx.outcome.skipped_errors += 1;
                Ok(())
            }
        }
    }

    /// Invokes the visitor if the depth window allows, catching the
    /// early-termination signal at this (document) boundary.
    fn visit(&self, node: &mut Node<'_>, ctx: &mut Ctx<'_>) -> Result<()> {
        if node.depth < self.min_depth {
            return Ok(());
        }
        ctx.outcome.visited += 1;
        match ctx.visitor.visit(node) {
            Err(Error::Stopped) => Ok(()),
            other => other,
        }
    }

    /// One filesystem node: directory, or file of any classification.
    fn walk_fs(
        &self,
        fs_path: &Path,
        node_path: &str,
        name: &str,
        depth: u32,
        parent: Option<&PropertyMap<'_>>,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let meta = self.resources.metadata(fs_path)?;
        if meta.is_dir {
            self.walk_dir(fs_path, node_path, name, depth, parent, &meta, ctx)
        } else {
            let file = self.resources.open_file(fs_path)?;
            self.walk_stream(
                Box::new(file),
                "file",
                node_path,
                name,
                depth,
                parent,
                NodeMeta::from_file(&meta),
                ctx,
            )
        }
    }

    fn walk_dir(
        &self,
        fs_path: &Path,
        node_path: &str,
        name: &str,
        depth: u32,
        parent: Option<&PropertyMap<'_>>,
        meta: &crate::resource::FileMeta,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let prune = Rc::new(Cell::new(false));
        let mut props = derive(parent);
        props.set("type", "directory")?;
        props.set("path", node_path)?;
        props.set("name", name)?;
        props.set("depth", depth as i64)?;
        NodeMeta::from_file(meta).apply(&mut props)?;

        let mut node = Node {
            node_type: "directory".into(),
            path: node_path.to_string(),
            name: name.to_string(),
            depth,
            props,
            stream: None,
            prune: Some(Rc::clone(&prune)),
        };

        if !self.descendants_first {
            self.visit(&mut node, ctx)?;
        }

        if !prune.get() && (depth as i64) < self.max_depth {
            let children = match self.resources.list_children(fs_path) {
                Ok(children) => children,
                Err(e) => {
                    self.handle(e.at(node_path), ctx)?;
                    Vec::new()
                }
            };
            for child in children {
                let child_fs = fs_path.join(&child.raw);
                // Symlinks are not followed: they would introduce cycles.
                match std::fs::symlink_metadata(&child_fs) {
                    Ok(m) if m.file_type().is_symlink() => {
                        log::debug!("not following symlink {}", child_fs.display());
                        continue;
                    }
                    _ => {}
                }
                let child_path = format!("{node_path}/{}", child.name);
                if let Err(e) =
                    self.walk_fs(&child_fs, &child_path, &child.name, depth + 1, Some(&node.props), ctx)
                {
                    self.handle(e.at(&child_path), ctx)?;
                }
            }
        }

        if self.descendants_first {
            self.visit(&mut node, ctx)?;
        }
        Ok(())
    }

    /// One stream-backed node: classifies the contents and dispatches.
    ///
    /// `base` is the type suffix this node composes onto: `file` for
    /// filesystem files, `contents` for stream roots, `<scheme>-resource`
    /// for URLs, or the full type of the enclosing container for nested
    /// nodes.
    #[allow(clippy::too_many_arguments)]
    fn walk_stream<'s>(
        &self,
        stream: Box<dyn Read + 's>,
        base: &str,
        node_path: &str,
        name: &str,
        depth: u32,
        parent: Option<&'s PropertyMap<'s>>,
        meta: NodeMeta,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let (prefix, stream) = peek(stream)?;
        let mut classification = detect::classify(&prefix, Some(name));
        if !codec::supported(classification) {
            log::debug!("{node_path}: no codec for {classification:?}, treating as normal");
            classification = Classification::Normal;
        }

        let node_type = match classification {
            Classification::Archive(_) => format!("archive-{base}"),
            Classification::Compressed(_) => format!("compressed-{base}"),
            Classification::Normal => format!("normal-{base}"),
        };

        match classification {
            Classification::Archive(format) if self.look_into.descend(format.name(), node_path) => {
                self.walk_archive(
                    format, stream, &node_type, node_path, name, depth, parent, meta, ctx,
                )
            }
            Classification::Compressed(format)
                if self.look_into.descend(format.name(), node_path) =>
            {
                self.walk_compressed(
                    format, stream, &node_type, node_path, name, depth, parent, meta, ctx,
                )
            }
            _ => {
                // Normal contents, or a container the policy keeps us out of:
                // a leaf with a consumable stream.
                let mut props = derive(parent);
                props.set("type", node_type.as_str())?;
                props.set("path", node_path)?;
                props.set("name", name)?;
                props.set("depth", depth as i64)?;
                meta.apply(&mut props)?;
                props.set("inputStream", true)?;
                if let Classification::Archive(f) = classification {
                    props.set("archiveFormat", f.name())?;
                } else if let Classification::Compressed(f) = classification {
                    props.set("compressionFormat", f.name())?;
                }

                let mut node = Node {
                    node_type,
                    path: node_path.to_string(),
                    name: name.to_string(),
                    depth,
                    props,
                    stream: Some(stream),
                    prune: None,
                };
                self.visit(&mut node, ctx)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_archive<'s>(
        &self,
        format: detect::ArchiveFormat,
        stream: Box<dyn Read + 's>,
        node_type: &str,
        node_path: &str,
        name: &str,
        depth: u32,
        parent: Option<&'s PropertyMap<'s>>,
        meta: NodeMeta,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let prune = Rc::new(Cell::new(false));
        let mut props = derive(parent);
        props.set("type", node_type)?;
        props.set("path", node_path)?;
        props.set("name", name)?;
        props.set("depth", depth as i64)?;
        props.set("archiveFormat", format.name())?;
        meta.apply(&mut props)?;

        let mut node = Node {
            node_type: node_type.to_string(),
            path: node_path.to_string(),
            name: name.to_string(),
            depth,
            props,
            stream: None,
            prune: Some(Rc::clone(&prune)),
        };

        if !self.descendants_first {
            self.visit(&mut node, ctx)?;
        }

        if !prune.get() && (depth as i64) < self.max_depth {
            let mut reader = codec::open_archive(format, stream)?;
            loop {
                let entry = match reader.next_entry() {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        self.handle(e.at(node_path), ctx)?;
                        continue;
                    }
                };
                let entry_path = format!("{node_path}!{}", entry.name);
                let entry_name = entry.name.clone();
                let result = if entry.is_directory {
                    self.visit_directory_entry(
                        &entry_path,
                        &entry_name,
                        depth + 1,
                        &node.props,
                        &entry,
                        ctx,
                    )
                } else {
                    let entry_meta = NodeMeta::from_entry(&entry);
                    self.walk_stream(
                        entry.stream,
                        node.node_type.as_str(),
                        &entry_path,
                        &entry_name,
                        depth + 1,
                        Some(&node.props),
                        entry_meta,
                        ctx,
                    )
                };
                if let Err(e) = result {
                    self.handle(e.at(node_path), ctx)?;
                }
            }
        }

        if self.descendants_first {
            self.visit(&mut node, ctx)?;
        }
        Ok(())
    }

    /// Visits the synthetic record for an archive entry marked as directory.
    fn visit_directory_entry(
        &self,
        path: &str,
        name: &str,
        depth: u32,
        parent: &PropertyMap<'_>,
        entry: &ArchiveEntry<'_>,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let mut props = PropertyMap::derived(parent);
        props.set("type", "directory-entry")?;
        props.set("path", path)?;
        props.set("name", name)?;
        props.set("depth", depth as i64)?;
        // Directory entries have size 0 regardless of what the format says.
        let meta = NodeMeta {
            size: 0,
            modified: entry.modified,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            ..NodeMeta::default()
        };
        meta.apply(&mut props)?;

        let mut node = Node {
            node_type: "directory-entry".into(),
            path: path.to_string(),
            name: name.to_string(),
            depth,
            props,
            stream: None,
            prune: None,
        };
        self.visit(&mut node, ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_compressed<'s>(
        &self,
        format: detect::CompressionFormat,
        stream: Box<dyn Read + 's>,
        node_type: &str,
        node_path: &str,
        name: &str,
        depth: u32,
        parent: Option<&'s PropertyMap<'s>>,
        meta: NodeMeta,
        ctx: &mut Ctx<'_>,
    ) -> Result<()> {
        let mut props = derive(parent);
        props.set("type", node_type)?;
        props.set("path", node_path)?;
        props.set("name", name)?;
        props.set("depth", depth as i64)?;
        props.set("compressionFormat", format.name())?;
        meta.apply(&mut props)?;

        let mut node = Node {
            node_type: node_type.to_string(),
            path: node_path.to_string(),
            name: name.to_string(),
            depth,
            props,
            stream: None,
            prune: None,
        };

        if !self.descendants_first {
            self.visit(&mut node, ctx)?;
        }

        if (depth as i64) < self.max_depth {
            let decompressed = codec::open_decompressor(format, stream)?;
            let child_path = format!("{node_path}%");
            let child_name = format!("{name}%");
            // The decompressed payload is a single virtual child of unknown
            // size.
            let result = self.walk_stream(
                decompressed,
                node.node_type.as_str(),
                &child_path,
                &child_name,
                depth + 1,
                Some(&node.props),
                NodeMeta {
                    size: -1,
                    ..NodeMeta::default()
                },
                ctx,
            );
            if let Err(e) = result {
                self.handle(e.at(node_path), ctx)?;
            }
        }

        if self.descendants_first {
            self.visit(&mut node, ctx)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Walker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walker")
            .field("min_depth", &self.min_depth)
            .field("max_depth", &self.max_depth)
            .field("descendants_first", &self.descendants_first)
            .field("error_policy", &self.error_policy)
            .finish()
    }
}

fn derive<'p>(parent: Option<&'p PropertyMap<'p>>) -> PropertyMap<'p> {
    match parent {
        Some(parent) => PropertyMap::derived(parent),
        None => PropertyMap::new(),
    }
}

/// Reads the classification prefix non-destructively: the returned stream
/// replays the prefix before the rest.
fn peek<'s>(mut stream: Box<dyn Read + 's>) -> Result<(Vec<u8>, Box<dyn Read + 's>)> {
    let mut prefix = vec![0u8; detect::PREFIX_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = stream.read(&mut prefix[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);
    let replay = io::Cursor::new(prefix.clone()).chain(stream);
    Ok((prefix, Box::new(replay)))
}
