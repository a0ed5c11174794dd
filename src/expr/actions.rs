//! Side-effecting expression actions.
//!
//! Each action produces a boolean: the subprocess actions report exit-code
//! zero, `delete` reports whether the removal succeeded, everything else is
//! `true` once its side effect ran. Actions that consume the node's contents
//! (`cat`, `copy`, `digest`, `checksum`, `pipe`, `disassemble`) take the
//! one-shot stream; a second consumer on the same visit gets a
//! contents-already-consumed error.

use std::io::{self, Read, Write};
use std::process::{Command, Stdio};

use chrono::{DateTime, Local};

use super::printf;
use super::template::Template;
use crate::checksum::{Adler32, Checksum, Crc32};
use crate::walk::Node;
use crate::{Error, Result};

/// Digest algorithms for the `-digest` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// MD5 (legacy, but still what jar manifests carry).
    Md5,
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Parses a user-supplied algorithm name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(Error::Config(format!("unknown digest algorithm '{name}'"))),
        }
    }
}

/// Checksum kinds for the `-checksum` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// CRC-32 (IEEE).
    Crc32,
    /// Adler-32.
    Adler32,
}

impl ChecksumKind {
    /// Parses a user-supplied checksum name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "CRC32" => Ok(Self::Crc32),
            "ADLER32" => Ok(Self::Adler32),
            _ => Err(Error::Config(format!("unknown checksum '{name}'"))),
        }
    }
}

/// An action node of the expression tree.
#[derive(Debug, Clone)]
pub enum Action {
    /// Emit the node path.
    Print,
    /// Emit an expanded template.
    Echo(Template),
    /// Emit a C-style formatted line; each argument is a property name.
    Printf {
        /// The format string.
        format: String,
        /// Property names consumed by the conversions.
        args: Vec<String>,
    },
    /// Emit an `ls -l` style line.
    Ls,
    /// Run a subprocess; stdio inherited.
    Exec(Vec<Template>),
    /// Run a subprocess with the node contents on its stdin.
    Pipe(Vec<Template>),
    /// Copy the node contents to the output channel.
    Cat,
    /// Write the node contents to a file named by the template.
    Copy {
        /// Target path template.
        target: Template,
        /// Create missing parent directories.
        mkdirs: bool,
    },
    /// Consume the contents and emit a hex digest.
    Digest(DigestAlgorithm),
    /// Consume the contents and emit a hex checksum.
    Checksum(ChecksumKind),
    /// Run the configured external disassembler on the contents.
    Disassemble,
    /// Suppress descent into the current container.
    Prune,
    /// Remove the node from the filesystem.
    Delete,
}

/// Evaluation environment: the info channel and action configuration.
pub struct EvalCtx<'o> {
    /// Where `print`, `echo`, `cat`, digests etc. emit.
    pub out: &'o mut dyn Write,
    /// Command line of the external disassembler, if configured.
    pub disassembler: Option<Vec<String>>,
}

impl<'o> EvalCtx<'o> {
    /// Creates a context emitting to `out`, with no disassembler.
    pub fn new(out: &'o mut dyn Write) -> Self {
        Self {
            out,
            disassembler: None,
        }
    }
}

impl Action {
    /// Runs the action on a node.
    pub fn run(&self, node: &mut Node<'_>, ctx: &mut EvalCtx<'_>) -> Result<bool> {
        match self {
            Action::Print => {
                writeln!(ctx.out, "{}", node.path())?;
                Ok(true)
            }

            Action::Echo(template) => {
                let line = template.expand(node)?;
                writeln!(ctx.out, "{line}")?;
                Ok(true)
            }

            Action::Printf { format, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(node.get_str(arg)?);
                }
                let refs: Vec<&str> = values.iter().map(String::as_str).collect();
                let text = printf::format(format, &refs)?;
                write!(ctx.out, "{text}")?;
                Ok(true)
            }

            Action::Ls => {
                let line = ls_line(node)?;
                writeln!(ctx.out, "{line}")?;
                Ok(true)
            }

            Action::Exec(words) => {
                let argv = expand_words(words, node)?;
                let (program, args) = argv.split_first().ok_or(Error::Action {
                    action: "exec",
                    reason: "empty command".into(),
                })?;
                let status = Command::new(program)
                    .args(args)
                    .status()
                    .map_err(|e| Error::Action {
                        action: "exec",
                        reason: format!("cannot run '{program}': {e}"),
                    })?;
                Ok(status.success())
            }

            Action::Pipe(words) => {
                let argv = expand_words(words, node)?;
                let (program, args) = argv.split_first().ok_or(Error::Action {
                    action: "pipe",
                    reason: "empty command".into(),
                })?;
                let mut stream = node.take_stream()?;
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|e| Error::Action {
                        action: "pipe",
                        reason: format!("cannot run '{program}': {e}"),
                    })?;
                {
                    let mut stdin = child.stdin.take().expect("stdin was piped");
                    io::copy(&mut stream, &mut stdin)?;
                }
                let status = child.wait().map_err(|e| Error::Action {
                    action: "pipe",
                    reason: e.to_string(),
                })?;
                Ok(status.success())
            }

            Action::Cat => {
                let mut stream = node.take_stream()?;
                io::copy(&mut stream, ctx.out)?;
                Ok(true)
            }

            Action::Copy { target, mkdirs } => {
                let target_path = std::path::PathBuf::from(target.expand(node)?);
                if *mkdirs {
                    if let Some(parent) = target_path.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| Error::Action {
                            action: "copy",
                            reason: format!("cannot create {}: {e}", parent.display()),
                        })?;
                    }
                }
                let mut stream = node.take_stream()?;
                let mut file = std::fs::File::create(&target_path).map_err(|e| Error::Action {
                    action: "copy",
                    reason: format!("cannot create {}: {e}", target_path.display()),
                })?;
                io::copy(&mut stream, &mut file)?;
                drop(file);
                if let Some(modified) = node.get("lastModifiedDate")?.and_then(|v| v.as_date()) {
                    let _ = filetime::set_file_mtime(
                        &target_path,
                        filetime::FileTime::from_system_time(modified),
                    );
                }
                Ok(true)
            }

            Action::Digest(algorithm) => {
                let mut stream = node.take_stream()?;
                let hex = match algorithm {
                    DigestAlgorithm::Md5 => hash_reader::<md5::Md5>(&mut stream)?,
                    DigestAlgorithm::Sha256 => hash_reader::<sha2::Sha256>(&mut stream)?,
                    DigestAlgorithm::Sha512 => hash_reader::<sha2::Sha512>(&mut stream)?,
                };
                writeln!(ctx.out, "{hex} {}", node.path())?;
                Ok(true)
            }

            Action::Checksum(kind) => {
                let mut stream = node.take_stream()?;
                let value = match kind {
                    ChecksumKind::Crc32 => Crc32::compute_reader(&mut stream)?,
                    ChecksumKind::Adler32 => Adler32::compute_reader(&mut stream)?,
                };
                writeln!(ctx.out, "{value:08x} {}", node.path())?;
                Ok(true)
            }

            Action::Disassemble => {
                let command = ctx.disassembler.clone().ok_or(Error::Action {
                    action: "disassemble",
                    reason: "no disassembler configured".into(),
                })?;
                let (program, args) = command.split_first().ok_or(Error::Action {
                    action: "disassemble",
                    reason: "empty disassembler command".into(),
                })?;
                let mut stream = node.take_stream()?;
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|e| Error::Action {
                        action: "disassemble",
                        reason: format!("cannot run '{program}': {e}"),
                    })?;
                {
                    let mut stdin = child.stdin.take().expect("stdin was piped");
                    io::copy(&mut stream, &mut stdin)?;
                }
                let status = child.wait().map_err(|e| Error::Action {
                    action: "disassemble",
                    reason: e.to_string(),
                })?;
                Ok(status.success())
            }

            Action::Prune => {
                node.set_prune();
                Ok(true)
            }

            Action::Delete => {
                let path = node.path();
                if path.contains('!') || path.contains('%') {
                    return Err(Error::Action {
                        action: "delete",
                        reason: format!("'{path}' is inside a container"),
                    });
                }
                let result = if node.node_type() == "directory" {
                    std::fs::remove_dir_all(path)
                } else {
                    std::fs::remove_file(path)
                };
                match result {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        log::warn!("delete {path}: {e}");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Whether this action consumes the node's contents stream.
    pub fn consumes_contents(&self) -> bool {
        matches!(
            self,
            Action::Pipe(_)
                | Action::Cat
                | Action::Copy { .. }
                | Action::Digest(_)
                | Action::Checksum(_)
                | Action::Disassemble
        )
    }
}

fn expand_words(words: &[Template], node: &mut Node<'_>) -> Result<Vec<String>> {
    words.iter().map(|w| w.expand(node)).collect()
}

fn hash_reader<D: sha2::Digest>(reader: &mut dyn Read) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0u8; crate::READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Builds the `-ls` line: type glyph, rwx flags, size, mtime, path.
fn ls_line(node: &mut Node<'_>) -> Result<String> {
    let glyph = match node.node_type() {
        "directory" | "directory-entry" => 'd',
        t if t.starts_with("archive-") => 'a',
        t if t.starts_with("compressed-") => 'c',
        _ => '-',
    };
    let flags = match node.get("mode")?.and_then(|v| v.as_int()) {
        Some(mode) => rwx(mode as u32),
        None => {
            let r = node.get("readable")?.map(|v| v.truthy()).unwrap_or(false);
            let w = node.get("writable")?.map(|v| v.truthy()).unwrap_or(false);
            let x = node.get("executable")?.map(|v| v.truthy()).unwrap_or(false);
            format!(
                "{}{}{}------",
                if r { 'r' } else { '-' },
                if w { 'w' } else { '-' },
                if x { 'x' } else { '-' }
            )
        }
    };
    let size = node.size()?;
    let mtime = match node.get("lastModifiedDate")?.and_then(|v| v.as_date()) {
        Some(time) => {
            let local: DateTime<Local> = time.into();
            local.format("%Y-%m-%d %H:%M").to_string()
        }
        None => "                ".to_string(),
    };
    Ok(format!("{glyph}{flags} {size:>10} {mtime} {}", node.path()))
}

fn rwx(mode: u32) -> String {
    let mut flags = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        flags.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        flags.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        flags.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    flags
}
