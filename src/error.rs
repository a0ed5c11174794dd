//! Error types for traversal, expression evaluation, and scanning.
//!
//! This module provides the [`Error`] enum which represents all failure modes
//! of the traversal engine and its visitors, along with a convenient
//! [`Result<T>`] type alias.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. Recoverable
//! per-child failures are wrapped with node-path context at every boundary that
//! adds information (entry name, then archive path, then root path), so a
//! failure deep inside `dist/app.tar.gz%!lib/foo.jar` reads as a chain:
//!
//! ```text
//! dist/app.tar.gz: dist/app.tar.gz%!lib/foo.jar: unsupported entry feature ...
//! ```
//!
//! Configuration errors (bad regex, bad glob, unknown digest algorithm) are
//! rejected before traversal starts and are never wrapped.

use std::io;

/// The main error type for traversal and scanning operations.
///
/// Errors fall into the categories of the failure model:
///
/// | Category | Variants | Typical cause |
/// |----------|----------|---------------|
/// | I/O | [`Io`][Self::Io] | File system and stream operations |
/// | Recoverable traversal | [`Walk`][Self::Walk], [`UnsupportedEntry`][Self::UnsupportedEntry] | A single child failed |
/// | Container format | [`Corrupt`][Self::Corrupt] | Damaged archive or stream |
/// | Configuration | [`Config`][Self::Config], [`BadPattern`][Self::BadPattern], [`BadRegex`][Self::BadRegex] | Rejected before traversal |
/// | Expression runtime | [`Action`][Self::Action], [`ContentsConsumed`][Self::ContentsConsumed] | An action failed on one node |
/// | Internal | [`Stopped`][Self::Stopped] | Early-termination signal, never surfaced |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on a file, directory, or stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A recoverable failure, wrapped with the path of the node it occurred on.
    ///
    /// The traversal engine adds one `Walk` layer per boundary that contributes
    /// context, producing a chain from the innermost failure out to the root
    /// argument. The configured [`ErrorPolicy`](crate::walk::ErrorPolicy)
    /// decides whether a `Walk` error aborts the traversal or only the
    /// offending subtree.
    #[error("{path}: {source}")]
    Walk {
        /// Path of the node on which the failure occurred.
        path: String,
        /// The wrapped failure.
        #[source]
        source: Box<Error>,
    },

    /// An archive entry uses a feature the codec does not support.
    ///
    /// Reported per-entry and treated as recoverable: the traversal can skip
    /// the entry and continue with the next sibling.
    #[error("entry '{entry}': unsupported feature: {feature}")]
    UnsupportedEntry {
        /// Name of the archive entry.
        entry: String,
        /// Description of the unsupported feature.
        feature: String,
    },

    /// A container is structurally damaged.
    #[error("corrupt {format} data: {reason}")]
    Corrupt {
        /// Short format name ("zip", "tar", "gzip", ...).
        format: &'static str,
        /// Description of the damage.
        reason: String,
    },

    /// Invalid configuration, rejected before traversal starts.
    ///
    /// Covers contradictory options, unknown digest algorithms, and other
    /// problems a user can fix on the command line. Never wrapped with path
    /// context.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A glob pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    BadPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A regular expression failed to compile.
    #[error("invalid regex '{pattern}': {reason}")]
    BadRegex {
        /// The offending expression.
        pattern: String,
        /// The regex crate's diagnostic.
        reason: String,
    },

    /// An expression action failed at runtime.
    ///
    /// Examples: a subprocess could not be spawned, a copy target could not
    /// be created. Treated like a recoverable I/O failure.
    #[error("action '{action}' failed: {reason}")]
    Action {
        /// The action name ("exec", "copy", ...).
        action: &'static str,
        /// Description of the failure.
        reason: String,
    },

    /// A second consumer tried to read the contents of a node whose stream
    /// was already drained (for example by a lazy `size` materialization).
    #[error("{path}: contents already consumed")]
    ContentsConsumed {
        /// Path of the node.
        path: String,
    },

    /// Internal early-termination signal.
    ///
    /// Raised by the scanner when a per-document limit is reached (max match
    /// count, first match in files-with-matches mode) and caught at the
    /// document boundary, where it is treated as normal completion. Callers
    /// outside the scanner never observe it.
    #[error("scan stopped")]
    Stopped,
}

impl Error {
    /// Wraps this error with the path of the node it occurred on.
    ///
    /// [`Stopped`][Self::Stopped] is never wrapped: it must stay recognizable
    /// at the document boundary.
    pub fn at(self, path: &str) -> Self {
        match self {
            Error::Stopped => Error::Stopped,
            other => Error::Walk {
                path: path.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` if this error is a configuration problem.
    ///
    /// Configuration errors map to exit code 1 on the command line; they are
    /// reported before any traversal happens.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::BadPattern { .. } | Error::BadRegex { .. }
        )
    }

    /// Returns `true` if this error may be skipped by a lenient error policy.
    ///
    /// Recoverable errors affect a single node or subtree; the traversal can
    /// continue with the next sibling. Configuration errors and the internal
    /// stop signal are not recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Walk { source, .. } => source.is_recoverable(),
            Error::Io(_)
            | Error::UnsupportedEntry { .. }
            | Error::Corrupt { .. }
            | Error::Action { .. }
            | Error::ContentsConsumed { .. } => true,
            _ => false,
        }
    }

    /// Returns the innermost (root-cause) error of a `Walk` chain.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Walk { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A specialized Result type for traversal operations.
pub type Result<T> = std::result::Result<T, Error>;
