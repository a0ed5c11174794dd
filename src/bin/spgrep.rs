//! spgrep — grep-style search through nested archives and compressed streams.
//!
//! ```text
//! spgrep [options] <regex> <file-or-dir>...
//! spgrep [options] <regex>              # reads standard input
//! spgrep -n -C 1 'password' config-backups/
//! spgrep -l --include '**.java' 'TODO' src.tar.gz
//! ```

use std::io::{Read, Write};
use std::process::ExitCode;

use clap::Parser;

use spelunk::scan::{ScanOp, ScanOptions, Scanner, Search, select_regexes};
use spelunk::{Error, ErrorPolicy, LookInto, Node, PatternList, Visitor, Walker};

/// Exit code: at least one line was selected.
const EXIT_MATCH: u8 = 0;
/// Exit code: no line was selected.
const EXIT_NO_MATCH: u8 = 1;
/// Exit code: configuration or traversal error.
const EXIT_ERROR: u8 = 2;

/// Grep-style search through nested archives
#[derive(Parser)]
#[command(name = "spgrep", version)]
#[command(about = "Grep-style search through nested archives and compressed streams")]
#[command(override_usage = "spgrep [OPTIONS] <REGEX> [FILE-OR-DIR]...")]
#[command(disable_help_flag = true)]
struct Cli {
    /// Print help
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Descend only into containers matching GLOB, tested as "format:path"
    #[arg(long = "look-into", value_name = "GLOB")]
    look_into: Vec<String>,

    /// Pattern to search for (repeatable; frees the first positional)
    #[arg(short = 'e', long = "regexp", value_name = "REGEX")]
    patterns: Vec<String>,

    /// Case-insensitive matching
    #[arg(short = 'i', long = "ignore-case")]
    ignore_case: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long = "inverted")]
    inverted: bool,

    /// Emit only the per-document count of selected lines
    #[arg(short = 'c', long = "count")]
    count: bool,

    /// Emit only the paths of documents with matches
    #[arg(short = 'l', long = "files-with-matches")]
    files_with_matches: bool,

    /// Emit only the paths of documents without matches
    #[arg(short = 'L', long = "files-without-match")]
    files_without_match: bool,

    /// Emit only the matched substrings
    #[arg(short = 'o', long = "only-matching")]
    only_matching: bool,

    /// Emit nothing; the exit status tells
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Stop each document after N selected lines
    #[arg(short = 'm', long = "max-count", value_name = "N")]
    max_count: Option<u64>,

    /// Prefix lines with their line number
    #[arg(short = 'n', long = "line-number")]
    line_numbers: bool,

    /// Prefix lines with their byte offset (before charset decoding)
    #[arg(short = 'b', long = "byte-offset")]
    byte_offsets: bool,

    /// Lines of context after each match
    #[arg(short = 'A', long = "after-context", value_name = "N")]
    after_context: Option<usize>,

    /// Lines of context before each match
    #[arg(short = 'B', long = "before-context", value_name = "N")]
    before_context: Option<usize>,

    /// Lines of context around each match
    #[arg(short = 'C', long = "context", value_name = "N")]
    context: Option<usize>,

    /// Always prefix output with the document path
    #[arg(short = 'H', long = "with-path")]
    with_path: bool,

    /// Never prefix output with the document path
    #[arg(short = 'h', long = "no-path")]
    no_path: bool,

    /// Label to use in place of "-" for standard input
    #[arg(long, value_name = "S")]
    label: Option<String>,

    /// Search only documents matching GLOB (repeatable, later wins)
    #[arg(long = "include", value_name = "GLOB")]
    include: Vec<String>,

    /// Skip documents matching GLOB (repeatable, later wins)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Charset of the searched documents (ASCII-compatible labels only)
    #[arg(long, value_name = "NAME")]
    encoding: Option<String>,

    /// Disassemble .class documents before searching
    #[arg(long = "disassemble-classes")]
    disassemble_classes: bool,

    /// External disassembler command (stdin: class file, stdout: text)
    #[arg(long, value_name = "CMD")]
    disassembler: Option<String>,

    /// Suppress warnings
    #[arg(long)]
    nowarn: bool,

    /// Informational messages
    #[arg(long)]
    verbose: bool,

    /// Debug tracing
    #[arg(long)]
    debug: bool,

    /// REGEX (unless -e is given), then files, directories, archives
    #[arg(value_name = "REGEX|FILE-OR-DIR")]
    positionals: Vec<String>,
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else if cli.quiet || cli.nowarn {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn operation(cli: &Cli) -> Result<ScanOp, Error> {
    let picked = [
        cli.count,
        cli.files_with_matches,
        cli.files_without_match,
        cli.only_matching,
        cli.quiet,
    ]
    .iter()
    .filter(|&&flag| flag)
    .count();
    if picked > 1 {
        return Err(Error::Config(
            "-c, -l, -L, -o and -q are mutually exclusive".into(),
        ));
    }
    Ok(if cli.count {
        ScanOp::Count
    } else if cli.files_with_matches {
        ScanOp::FilesWithMatches
    } else if cli.files_without_match {
        ScanOp::FilesWithoutMatch
    } else if cli.only_matching {
        ScanOp::OnlyMatching
    } else if cli.quiet {
        ScanOp::Quiet
    } else {
        ScanOp::Normal
    })
}

struct Grep<'g> {
    searches: &'g [Search],
    options: ScanOptions,
    filter: &'g PatternList,
    show_path: bool,
    stdin_label: Option<&'g str>,
    disassembler: Option<Vec<String>>,
    disassemble_classes: bool,
    out: std::io::StdoutLock<'static>,
    selected_total: u64,
    failures: u64,
}

impl Grep<'_> {
    /// Runs the external disassembler over the contents, returning its
    /// textual output as the document to scan.
    fn disassemble(&self, stream: &mut dyn Read, path: &str) -> spelunk::Result<Vec<u8>> {
        let command = self.disassembler.clone().ok_or(Error::Action {
            action: "disassemble",
            reason: "no disassembler configured (--disassembler)".into(),
        })?;
        let (program, args) = command.split_first().ok_or(Error::Action {
            action: "disassemble",
            reason: "empty disassembler command".into(),
        })?;
        let mut contents = Vec::new();
        stream.read_to_end(&mut contents)?;
        let mut child = std::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| Error::Action {
                action: "disassemble",
                reason: format!("cannot run '{program}' on {path}: {e}"),
            })?;
        let mut stdin = child.stdin.take().expect("stdin was piped");
        let feeder = std::thread::spawn(move || {
            let _ = stdin.write_all(&contents);
        });
        let mut output = Vec::new();
        child
            .stdout
            .take()
            .expect("stdout was piped")
            .read_to_end(&mut output)?;
        feeder.join().ok();
        let status = child.wait().map_err(|e| Error::Action {
            action: "disassemble",
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(Error::Action {
                action: "disassemble",
                reason: format!("'{program}' failed on {path}"),
            });
        }
        Ok(output)
    }
}

impl Visitor for Grep<'_> {
    fn visit(&mut self, node: &mut Node<'_>) -> spelunk::Result<()> {
        if !node.has_contents() {
            return Ok(());
        }
        let path = node.path().to_string();
        if !self.filter.matches(&path) {
            return Ok(());
        }
        let regexes = select_regexes(self.searches, &path);
        if regexes.is_empty() {
            return Ok(());
        }

        let display: &str = if path == "-" {
            self.stdin_label.unwrap_or("(standard input)")
        } else {
            &path
        };
        let label = self.show_path.then_some(display);

        let mut stream = node.take_stream()?;
        let result = if self.disassemble_classes && path.ends_with(".class") {
            self.disassemble(&mut stream, &path).and_then(|text| {
                Scanner::new(regexes, &self.options, label, &mut self.out).scan(&text[..])
            })
        } else {
            Scanner::new(regexes, &self.options, label, &mut self.out).scan(&mut stream)
        };
        match result {
            Ok(summary) => {
                self.selected_total += summary.selected;
                Ok(())
            }
            // A document that cannot be read or disassembled is skipped,
            // like any other recoverable per-node failure.
            Err(e) if e.is_recoverable() => {
                log::warn!("{display}: {e}");
                self.failures += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn run(cli: &Cli) -> Result<u8, Error> {
    let (patterns, roots) = if cli.patterns.is_empty() {
        match cli.positionals.split_first() {
            Some((regex, rest)) => (vec![regex.clone()], rest.to_vec()),
            None => return Err(Error::Config("no pattern given".into())),
        }
    } else {
        (cli.patterns.clone(), cli.positionals.clone())
    };
    let roots = if roots.is_empty() {
        vec!["-".to_string()]
    } else {
        roots
    };

    let mut searches = Vec::new();
    for pattern in &patterns {
        searches.push(Search::new("**", pattern, cli.ignore_case)?);
    }

    let mut filter = PatternList::new();
    for glob in &cli.include {
        filter.add(glob)?;
    }
    for glob in &cli.exclude {
        filter.add_negated(glob)?;
    }

    let mut look_into = PatternList::new();
    for glob in &cli.look_into {
        look_into.add(glob)?;
    }

    let options = ScanOptions {
        inverted: cli.inverted,
        line_numbers: cli.line_numbers,
        byte_offsets: cli.byte_offsets,
        before_context: cli.before_context.or(cli.context).unwrap_or(0),
        after_context: cli.after_context.or(cli.context).unwrap_or(0),
        max_count: cli.max_count,
        op: operation(cli)?,
        encoding: match &cli.encoding {
            Some(label) => Some(ScanOptions::resolve_encoding(label)?),
            None => None,
        },
    };

    // Like grep: paths are shown when more than one document may be
    // scanned, unless forced either way.
    let stdin_only = roots.len() == 1 && roots[0] == "-";
    let show_path = if cli.no_path {
        false
    } else {
        cli.with_path || !stdin_only
    };

    if cli.disassemble_classes && cli.disassembler.is_none() {
        return Err(Error::Config(
            "--disassemble-classes needs --disassembler".into(),
        ));
    }

    let walker = Walker::new()
        .look_into(LookInto::from_list(look_into))
        .error_policy(if cli.nowarn {
            ErrorPolicy::Ignore
        } else {
            ErrorPolicy::Warn
        });

    let mut visitor = Grep {
        searches: &searches,
        options,
        filter: &filter,
        show_path,
        stdin_label: cli.label.as_deref(),
        disassembler: cli
            .disassembler
            .as_ref()
            .map(|cmd| cmd.split_whitespace().map(String::from).collect()),
        disassemble_classes: cli.disassemble_classes,
        out: std::io::stdout().lock(),
        selected_total: 0,
        failures: 0,
    };

    let mut failures = 0u64;
    for root in &roots {
        match walker.scan_spec(root, &mut visitor) {
            Ok(outcome) => failures += outcome.skipped_errors,
            Err(e) => {
                log::error!("{root}: {e}");
                failures += 1;
            }
        }
    }
    failures += visitor.failures;
    visitor.out.flush()?;

    if failures > 0 {
        Ok(EXIT_ERROR)
    } else if visitor.selected_total > 0 {
        Ok(EXIT_MATCH)
    } else {
        Ok(EXIT_NO_MATCH)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    ctrlc::set_handler(|| {
        eprintln!("\nInterrupted");
        std::process::exit(130);
    })
    .ok();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) if e.is_config() => {
            eprintln!("spgrep: {e}");
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("spgrep: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_positional_regex_and_roots() {
        let cli = Cli::try_parse_from(["spgrep", "-n", "foo", "a", "b"]).unwrap();
        assert!(cli.line_numbers);
        assert_eq!(cli.positionals, vec!["foo", "a", "b"]);
    }

    #[test]
    fn test_cli_repeatable_patterns() {
        let cli = Cli::try_parse_from(["spgrep", "-e", "foo", "-e", "bar", "dir"]).unwrap();
        assert_eq!(cli.patterns, vec!["foo", "bar"]);
        assert_eq!(cli.positionals, vec!["dir"]);
    }

    #[test]
    fn test_cli_context_flags() {
        let cli = Cli::try_parse_from(["spgrep", "-A", "2", "-B", "1", "x"]).unwrap();
        assert_eq!(cli.after_context, Some(2));
        assert_eq!(cli.before_context, Some(1));

        let cli = Cli::try_parse_from(["spgrep", "-C", "3", "x"]).unwrap();
        assert_eq!(cli.context, Some(3));
    }

    #[test]
    fn test_cli_no_path_short_h_is_not_help() {
        let cli = Cli::try_parse_from(["spgrep", "-h", "x"]).unwrap();
        assert!(cli.no_path);
    }

    #[test]
    fn test_operation_exclusive() {
        let cli = Cli::try_parse_from(["spgrep", "-c", "-l", "x"]).unwrap();
        assert!(operation(&cli).is_err());

        let cli = Cli::try_parse_from(["spgrep", "-l", "x"]).unwrap();
        assert_eq!(operation(&cli).unwrap(), ScanOp::FilesWithMatches);

        let cli = Cli::try_parse_from(["spgrep", "x"]).unwrap();
        assert_eq!(operation(&cli).unwrap(), ScanOp::Normal);
    }
}
