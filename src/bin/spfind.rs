//! spfind — find-style search through nested archives and compressed streams.
//!
//! ```text
//! spfind [options] <file-or-dir>... [expression]
//! spfind dist -name '*.class' -size +1K
//! spfind releases '(' -type 'archive-*' -prune ')' -o -print
//! ```

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use spelunk::expr::{self, EvalCtx};
use spelunk::{Error, ErrorPolicy, LookInto, Node, PatternList, Visitor, Walker};

/// Exit code: ran to completion without errors.
const EXIT_OK: u8 = 0;
/// Exit code: configuration rejected before traversal.
const EXIT_CONFIG: u8 = 1;
/// Exit code: recoverable traversal errors occurred.
const EXIT_ERRORS: u8 = 2;

/// Find-style search through nested archives
#[derive(Parser)]
#[command(name = "spfind", version)]
#[command(about = "Find-style search through nested archives and compressed streams")]
#[command(override_usage = "spfind [OPTIONS] <FILE-OR-DIR>... [EXPRESSION]")]
struct Cli {
    /// Descend only into containers matching GLOB, tested as "format:path"
    #[arg(long = "look-into", value_name = "GLOB")]
    look_into: Vec<String>,

    /// Visit children before their container
    #[arg(long, alias = "depth")]
    descendants_first: bool,

    /// Suppress visits at depths below N
    #[arg(long = "min-depth", value_name = "N", default_value_t = 0)]
    min_depth: u32,

    /// Stop descent at depth N (negative: do nothing)
    #[arg(long = "max-depth", value_name = "N", allow_hyphen_values = true)]
    max_depth: Option<i64>,

    /// Password for encrypted containers (format-specific)
    #[arg(long, value_name = "S")]
    password: Option<String>,

    /// External command for -disassemble (stdin: class file bytes)
    #[arg(long, value_name = "CMD")]
    disassembler: Option<String>,

    /// Suppress warnings
    #[arg(long)]
    nowarn: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,

    /// Informational messages
    #[arg(short, long)]
    verbose: bool,

    /// Debug tracing
    #[arg(long)]
    debug: bool,

    /// Roots, then the expression (`-` reads standard input)
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "FILE-OR-DIR|EXPRESSION"
    )]
    args: Vec<String>,
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

/// Splits the trailing arguments into roots and expression tokens.
///
/// Roots run until the first token that can start an expression: `(`, `!`,
/// or anything beginning with `-` (except the bare `-`, which is a root
/// meaning standard input).
fn split_roots(args: &[String]) -> (Vec<String>, Vec<String>) {
    let boundary = args
        .iter()
        .position(|a| a == "(" || a == "!" || (a.starts_with('-') && a.len() > 1))
        .unwrap_or(args.len());
    (args[..boundary].to_vec(), args[boundary..].to_vec())
}

struct Evaluate<'e> {
    expr: &'e expr::Expr,
    disassembler: Option<Vec<String>>,
    warn: bool,
    action_errors: u64,
    out: std::io::StdoutLock<'static>,
}

impl Visitor for Evaluate<'_> {
    fn visit(&mut self, node: &mut Node<'_>) -> spelunk::Result<()> {
        let mut ctx = EvalCtx::new(&mut self.out);
        ctx.disassembler = self.disassembler.clone();
        match self.expr.eval(node, &mut ctx) {
            Ok(_) => Ok(()),
            // Expression-runtime failures affect one node; continue with
            // the next sibling like recoverable I/O failures.
            Err(e) if e.is_recoverable() => {
                if self.warn {
                    log::warn!("{}: {e}", node.path());
                }
                self.action_errors += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn run(cli: &Cli) -> Result<u8, Error> {
    let (roots, tokens) = split_roots(&cli.args);
    if roots.is_empty() {
        return Err(Error::Config("no file or directory given".into()));
    }

    let expression = expr::parse(&tokens)?;

    let mut look_into = PatternList::new();
    for glob in &cli.look_into {
        look_into.add(glob)?;
    }

    if cli.password.is_some() {
        log::warn!("--password has no effect: no encrypted container formats in this build");
    }

    let walker = Walker::new()
        .min_depth(cli.min_depth)
        .max_depth(cli.max_depth.unwrap_or(i64::MAX))
        .descendants_first(cli.descendants_first)
        .look_into(LookInto::from_list(look_into))
        .error_policy(if cli.nowarn {
            ErrorPolicy::Ignore
        } else {
            ErrorPolicy::Warn
        });

    let mut visitor = Evaluate {
        expr: &expression,
        disassembler: cli
            .disassembler
            .as_ref()
            .map(|cmd| cmd.split_whitespace().map(String::from).collect()),
        warn: !cli.nowarn,
        action_errors: 0,
        out: std::io::stdout().lock(),
    };

    let mut skipped = 0u64;
    let mut root_failures = 0u64;
    for root in &roots {
        match walker.scan_spec(root, &mut visitor) {
            Ok(outcome) => skipped += outcome.skipped_errors,
            Err(e) => {
                log::error!("{root}: {e}");
                root_failures += 1;
            }
        }
    }
    let action_errors = visitor.action_errors;
    visitor.out.flush()?;

    if skipped > 0 || root_failures > 0 || action_errors > 0 {
        Ok(EXIT_ERRORS)
    } else {
        Ok(EXIT_OK)
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
            eprintln!("spfind: {e}");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            eprintln!("spfind: {e}");
            ExitCode::from(EXIT_ERRORS)
        }
    }
}
