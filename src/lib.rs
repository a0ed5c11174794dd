//! # spelunk
//!
//! Recursive content-processing through nested containers: a traversal
//! engine that descends into directories, archives, and compressed streams
//! to arbitrary nesting depth, plus the two visitors built on it — a
//! find-style expression evaluator and a grep-style pattern scanner. The
//! `spfind` and `spgrep` binaries (feature `cli`) wrap them.
//!
//! ## Quick Start
//!
//! ### Walking a tree, archives included
//!
//! ```rust,no_run
//! use spelunk::{Node, Result, Walker};
//!
//! fn main() -> Result<()> {
//!     let walker = Walker::new();
//!     walker.scan_path("dist".as_ref(), &mut |node: &mut Node| {
//!         // A class file inside a jar inside a tarball prints as
//!         // dist/app.tar.gz%!lib/foo.jar!x/y.class
//!         println!("{}\t{}", node.node_type(), node.path());
//!         Ok(())
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ### Evaluating a find expression
//!
//! ```rust,no_run
//! use spelunk::expr::{self, EvalCtx};
//! use spelunk::{Node, Result, Walker};
//!
//! fn main() -> Result<()> {
//!     let tokens: Vec<String> = ["-name", "*.class", "-size", "+1K"]
//!         .iter()
//!         .map(|s| s.to_string())
//!         .collect();
//!     let expr = expr::parse(&tokens)?;
//!     let mut stdout = std::io::stdout();
//!     Walker::new().scan_path("build".as_ref(), &mut |node: &mut Node| {
//!         let mut ctx = EvalCtx::new(&mut stdout);
//!         expr.eval(node, &mut ctx)?;
//!         Ok(())
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ### Scanning for patterns
//!
//! ```rust,no_run
//! use spelunk::scan::{ScanOptions, Scanner, Search, select_regexes};
//! use spelunk::{Node, Result, Walker};
//!
//! fn main() -> Result<()> {
//!     let searches = vec![Search::new("**", "TODO", false)?];
//!     let options = ScanOptions {
//!         line_numbers: true,
//!         ..ScanOptions::default()
//!     };
//!     let mut stdout = std::io::stdout();
//!     Walker::new().scan_path("src".as_ref(), &mut |node: &mut Node| {
//!         if !node.has_contents() {
//!             return Ok(());
//!         }
//!         let regexes = select_regexes(&searches, node.path());
//!         let path = node.path().to_string();
//!         let stream = node.take_stream()?;
//!         Scanner::new(regexes, &options, Some(&path), &mut stdout).scan(stream)?;
//!         Ok(())
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Path encoding
//!
//! Traversal paths separate plain directory levels with `/`, archive entries
//! with `!`, and mark decompressed payloads with a `%` suffix. Node types
//! compose the same way (`normal-archive-compressed-file` is a plain entry
//! of an archive inside a compressed file). See [`walk`] for the full rules.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `zip` | Yes | ZIP archive reading and writing |
//! | `tar` | Yes | TAR archive reading and writing |
//! | `gzip` | Yes | gzip compressed streams |
//! | `bzip2` | Yes | bzip2 compressed streams |
//! | `cli` | No | The `spfind` and `spgrep` binaries |
//!
//! A container format without its codec feature is traversed as opaque
//! normal contents rather than failing.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod checksum;
pub mod codec;
pub mod detect;
pub mod error;
pub mod expr;
pub mod glob;
#[cfg(all(feature = "zip", feature = "tar"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "zip", feature = "tar"))))]
pub mod pack;
pub mod props;
pub mod resource;
pub mod scan;
pub mod walk;

pub use detect::{ArchiveFormat, Classification, CompressionFormat, LookInto, classify};
pub use error::{Error, Result};
pub use glob::{Pattern, PatternList};
#[cfg(all(feature = "zip", feature = "tar"))]
pub use pack::{Packer, RenameRule};
pub use props::{PropertyMap, Value};
pub use resource::{NameOrdering, Resources, SanitizeMap};
pub use scan::{ScanOp, ScanOptions, Scanner, Search};
pub use walk::{ErrorPolicy, Node, ScanOutcome, Visitor, Walker};

/// Buffer size for stream pumping throughout the crate.
pub(crate) const READ_BUFFER_SIZE: usize = 8192;
