//! Streaming multi-pattern scanner over textual contents.
//!
//! A [`Scanner`] is constructed per document from a set of compiled regexes
//! and [`ScanOptions`], and pumps the document's lines through the selected
//! [`ScanOp`]. It understands CR, LF, and CRLF line terminators (CRLF counts
//! as one), keeps a rolling window of `before_context` lines and an
//! `after_context` countdown, separates discontinuous context chunks with
//! `--`, and prefixes output with the document label, line number, and byte
//! offset as requested — joined with `:` on matching lines and `-` on context
//! lines.
//!
//! Byte offsets are observed on the raw stream, before any charset decoding:
//! the line reader counts consumed bytes and each line carries the offset of
//! its first raw byte.
//!
//! Early termination (the per-document match cap, or the first match in the
//! files-with/without-matches and quiet modes) is signalled internally with
//! [`Error::Stopped`] and caught at the document boundary inside
//! [`Scanner::scan`]; callers never observe it.

use std::io::{Read, Write};

use encoding_rs::Encoding;
use regex::Regex;

use crate::glob::Pattern;
use crate::{Error, Result};

/// What the scanner emits for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOp {
    /// Full matching lines with context and separators.
    #[default]
    Normal,
    /// Only the matched substrings, one per line.
    OnlyMatching,
    /// Only the per-document count of selected lines.
    Count,
    /// Only the document label, iff at least one line was selected.
    FilesWithMatches,
    /// Only the document label, iff no line was selected.
    FilesWithoutMatch,
    /// Nothing; matches are still counted.
    Quiet,
}

/// One search of a run: a path glob paired with a compiled regex.
///
/// On entering a document, [`select_regexes`] keeps the regexes whose glob
/// matches the document path; the scanner then runs only those.
#[derive(Debug, Clone)]
pub struct Search {
    /// Path filter; `**` matches every document.
    pub path_glob: Pattern,
    /// The pattern looked for in matching documents.
    pub regex: Regex,
}

impl Search {
    /// Builds a search from pattern sources.
    pub fn new(path_glob: &str, regex: &str, ignore_case: bool) -> Result<Self> {
        let regex = regex::RegexBuilder::new(regex)
            .case_insensitive(ignore_case)
            .multi_line(true)
            .build()
            .map_err(|e| Error::BadRegex {
                pattern: regex.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            path_glob: Pattern::new(path_glob)?,
            regex,
        })
    }
}

/// Filters a run's searches down to the regexes applying to one document.
pub fn select_regexes<'s>(searches: &'s [Search], path: &str) -> Vec<&'s Regex> {
    searches
        .iter()
        .filter(|s| s.path_glob.matches(path))
        .map(|s| &s.regex)
        .collect()
}

/// Per-run scanner configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Select lines that match no regex instead.
    pub inverted: bool,
    /// Prefix lines with their 1-based line number.
    pub line_numbers: bool,
    /// Prefix lines with the raw byte offset of their first byte.
    pub byte_offsets: bool,
    /// How many non-matching lines to replay before a match.
    pub before_context: usize,
    /// How many lines to echo after a match.
    pub after_context: usize,
    /// Stop the document after this many selected lines.
    pub max_count: Option<u64>,
    /// The output operation.
    pub op: ScanOp,
    /// Charset of the documents; `None` means UTF-8 (lossy).
    pub encoding: Option<&'static Encoding>,
}

impl ScanOptions {
    /// Resolves an `--encoding` label.
    ///
    /// Only ASCII-compatible encodings are accepted: line terminators are
    /// located on the raw byte stream, which UTF-16 would break.
    pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| Error::Config(format!("unknown encoding '{label}'")))?;
        if encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE {
            return Err(Error::Config(format!(
                "encoding '{label}' is not ASCII-compatible"
            )));
        }
        Ok(encoding)
    }
}

/// Result of scanning one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Selected (matching, or with `inverted` non-matching) lines.
    pub selected: u64,
}

/// One buffered line, pre-decoding.
struct RawLine {
    bytes: Vec<u8>,
    /// Raw byte offset of the first byte of the line.
    offset: u64,
    number: u64,
}

/// Splits a raw byte stream into lines, counting bytes before any decoding.
struct Lines<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    offset: u64,
    number: u64,
    eof: bool,
}

impl<R: Read> Lines<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; crate::READ_BUFFER_SIZE],
            pos: 0,
            len: 0,
            offset: 0,
            number: 0,
            eof: false,
        }
    }

    fn peek_byte(&mut self) -> std::io::Result<Option<u8>> {
        if self.pos == self.len {
            if self.eof {
                return Ok(None);
            }
            self.pos = 0;
            self.len = self.inner.read(&mut self.buf)?;
            if self.len == 0 {
                self.eof = true;
                return Ok(None);
            }
        }
        Ok(Some(self.buf[self.pos]))
    }

    fn next_line(&mut self) -> std::io::Result<Option<RawLine>> {
        let offset = self.offset;
        let mut bytes = Vec::new();
        let mut terminator_len = 0u64;
        loop {
            match self.peek_byte()? {
                None => {
                    if bytes.is_empty() && terminator_len == 0 {
                        return Ok(None);
                    }
                    break;
                }
                Some(b'\n') => {
                    self.pos += 1;
                    terminator_len = 1;
                    break;
                }
                Some(b'\r') => {
                    self.pos += 1;
                    terminator_len = 1;
                    // CRLF is a single termination.
                    if self.peek_byte()? == Some(b'\n') {
                        self.pos += 1;
                        terminator_len = 2;
                    }
                    break;
                }
                Some(b) => {
                    self.pos += 1;
                    bytes.push(b);
                }
            }
        }
        self.offset += bytes.len() as u64 + terminator_len;
        self.number += 1;
        Ok(Some(RawLine {
            bytes,
            offset,
            number: self.number,
        }))
    }
}

/// Per-document scanner.
pub struct Scanner<'a> {
    regexes: Vec<&'a Regex>,
    options: &'a ScanOptions,
    /// Document label for prefixes and the files-with(out)-matches modes;
    /// `None` suppresses the path prefix.
    label: Option<&'a str>,
    out: &'a mut dyn Write,

    selected: u64,
    before: std::collections::VecDeque<RawLine>,
    after_countdown: usize,
    had_match: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner for one document.
    pub fn new(
        regexes: Vec<&'a Regex>,
        options: &'a ScanOptions,
        label: Option<&'a str>,
        out: &'a mut dyn Write,
    ) -> Self {
        Self {
            regexes,
            options,
            label,
            out,
            selected: 0,
            before: std::collections::VecDeque::new(),
            after_countdown: 0,
            had_match: false,
        }
    }

    /// Scans the document, emitting per the configured operation.
    ///
    /// The early-termination signal is caught here; the summary is accurate
    /// either way.
    pub fn scan(&mut self, input: impl Read) -> Result<ScanSummary> {
        if self.regexes.is_empty() {
            return Ok(ScanSummary::default());
        }

        let mut lines = Lines::new(input);
        let outcome = loop {
            match lines.next_line()? {
                None => break Ok(()),
                Some(line) => match self.process_line(line) {
                    Err(Error::Stopped) => break Err(Error::Stopped),
                    other => other?,
                },
            }
        };
        // Stop-document is normal completion of this document.
        drop(outcome);

        match self.options.op {
            ScanOp::Count => {
                self.emit_label_prefixed(&self.selected.to_string())?;
            }
            ScanOp::FilesWithMatches if self.selected > 0 => {
                self.emit_label_line()?;
            }
            ScanOp::FilesWithoutMatch if self.selected == 0 => {
                self.emit_label_line()?;
            }
            _ => {}
        }
        Ok(ScanSummary {
            selected: self.selected,
        })
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self.options.encoding {
            Some(encoding) => encoding.decode_without_bom_handling(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    fn process_line(&mut self, line: RawLine) -> Result<()> {
        let text = self.decode(&line.bytes);
        let matched = self.regexes.iter().any(|r| r.is_match(&text));
        let selected = matched != self.options.inverted;

        if !selected {
            self.on_non_matching(line)?;
            return Ok(());
        }

        self.selected += 1;
        match self.options.op {
            ScanOp::Normal => {
                self.emit_match_with_context(&line, &text)?;
            }
            ScanOp::OnlyMatching => {
                for regex in &self.regexes {
                    for m in regex.find_iter(&text) {
                        let offset = line.offset + m.start() as u64;
                        let prefix = self.prefix(b':', line.number, offset);
                        writeln!(self.out, "{prefix}{}", m.as_str())?;
                    }
                }
            }
            ScanOp::Count => {}
            ScanOp::FilesWithMatches | ScanOp::FilesWithoutMatch | ScanOp::Quiet => {
                // The verdict is known after the first selected line.
                return Err(Error::Stopped);
            }
        }

        if let Some(max) = self.options.max_count {
            if self.selected >= max {
                return Err(Error::Stopped);
            }
        }
        Ok(())
    }

    fn on_non_matching(&mut self, line: RawLine) -> Result<()> {
        if self.options.op != ScanOp::Normal {
            return Ok(());
        }
        if self.after_countdown > 0 {
            self.after_countdown -= 1;
            let text = self.decode(&line.bytes);
            let prefix = self.prefix(b'-', line.number, line.offset);
            writeln!(self.out, "{prefix}{text}")?;
            return Ok(());
        }
        if self.options.before_context > 0 {
            if self.before.len() == self.options.before_context {
                self.before.pop_front();
            }
            self.before.push_back(line);
        }
        Ok(())
    }

    fn emit_match_with_context(&mut self, line: &RawLine, text: &str) -> Result<()> {
        let context_configured =
            self.options.before_context > 0 || self.options.after_context > 0;
        if context_configured
            && self.had_match
            && self.after_countdown == 0
            && self.before.len() == self.options.before_context
        {
            writeln!(self.out, "--")?;
        }

        while let Some(pending) = self.before.pop_front() {
            let text = self.decode(&pending.bytes);
            let prefix = self.prefix(b'-', pending.number, pending.offset);
            writeln!(self.out, "{prefix}{text}")?;
        }

        let prefix = self.prefix(b':', line.number, line.offset);
        writeln!(self.out, "{prefix}{text}")?;

        self.after_countdown = self.options.after_context;
        self.had_match = true;
        Ok(())
    }

    /// Builds the `label:line:offset:` prefix, with `-` instead of `:` on
    /// context lines.
    fn prefix(&self, sep: u8, number: u64, offset: u64) -> String {
        let sep = sep as char;
        let mut prefix = String::new();
        if let Some(label) = self.label {
            prefix.push_str(label);
            prefix.push(sep);
        }
        if self.options.line_numbers {
            prefix.push_str(&number.to_string());
            prefix.push(sep);
        }
        if self.options.byte_offsets {
            prefix.push_str(&offset.to_string());
            prefix.push(sep);
        }
        prefix
    }

    fn emit_label_line(&mut self) -> Result<()> {
        let label = self.label.unwrap_or("(standard input)");
        writeln!(self.out, "{label}")?;
        Ok(())
    }

    fn emit_label_prefixed(&mut self, text: &str) -> Result<()> {
        match self.label {
            Some(label) => writeln!(self.out, "{label}:{text}")?,
            None => writeln!(self.out, "{text}")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str, options: &ScanOptions, patterns: &[&str]) -> (String, ScanSummary) {
        run_labeled(input, options, patterns, None)
    }

    fn run_labeled(
        input: &str,
        options: &ScanOptions,
        patterns: &[&str],
        label: Option<&str>,
    ) -> (String, ScanSummary) {
        let regexes: Vec<Regex> = patterns
            .iter()
            .map(|p| {
                regex::RegexBuilder::new(p)
                    .multi_line(true)
                    .build()
                    .unwrap()
            })
            .collect();
        let mut out = Vec::new();
        let summary = {
            let refs: Vec<&Regex> = regexes.iter().collect();
            let mut scanner = Scanner::new(refs, options, label, &mut out);
            scanner.scan(input.as_bytes()).unwrap()
        };
        (String::from_utf8(out).unwrap(), summary)
    }

    #[test]
    fn test_normal_emits_matching_lines() {
        let (out, summary) = run("one\ntwo\nthree\n", &ScanOptions::default(), &["t"]);
        assert_eq!(out, "two\nthree\n");
        assert_eq!(summary.selected, 2);
    }

    #[test]
    fn test_no_match() {
        let (out, summary) = run("one\ntwo\n", &ScanOptions::default(), &["zzz"]);
        assert_eq!(out, "");
        assert_eq!(summary.selected, 0);
    }

    #[test]
    fn test_empty_regex_list_emits_nothing() {
        let options = ScanOptions::default();
        let mut out = Vec::new();
        let mut scanner = Scanner::new(Vec::new(), &options, None, &mut out);
        let summary = scanner.scan(&b"anything\n"[..]).unwrap();
        assert_eq!(summary.selected, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_inverted() {
        let options = ScanOptions {
            inverted: true,
            ..ScanOptions::default()
        };
        let (out, summary) = run("one\ntwo\nthree\n", &options, &["t"]);
        assert_eq!(out, "one\n");
        assert_eq!(summary.selected, 1);
    }

    #[test]
    fn test_multiple_patterns_any_matches() {
        let (out, _) = run("alpha\nbeta\ngamma\n", &ScanOptions::default(), &["^a", "^g"]);
        assert_eq!(out, "alpha\ngamma\n");
    }

    #[test]
    fn test_line_numbers() {
        let options = ScanOptions {
            line_numbers: true,
            ..ScanOptions::default()
        };
        let (out, _) = run("a\nb\na\n", &options, &["a"]);
        assert_eq!(out, "1:a\n3:a\n");
    }

    #[test]
    fn test_byte_offsets_before_decoding() {
        let options = ScanOptions {
            byte_offsets: true,
            ..ScanOptions::default()
        };
        // "ab\r\n" occupies bytes 0..4, so "cd" starts at 4.
        let (out, _) = run("ab\r\ncd\n", &options, &["cd"]);
        assert_eq!(out, "4:cd\n");
    }

    #[test]
    fn test_label_prefix() {
        let options = ScanOptions {
            line_numbers: true,
            ..ScanOptions::default()
        };
        let (out, _) = run_labeled("x\n", &options, &["x"], Some("doc.txt"));
        assert_eq!(out, "doc.txt:1:x\n");
    }

    #[test]
    fn test_crlf_is_single_termination() {
        let options = ScanOptions {
            line_numbers: true,
            ..ScanOptions::default()
        };
        let (out, summary) = run("a\r\nb\rc\nx", &options, &["."]);
        // CR, LF and CRLF all delimit; 4 lines total.
        assert_eq!(out, "1:a\n2:b\n3:c\n4:x\n");
        assert_eq!(summary.selected, 4);
    }

    #[test]
    fn test_context_with_separator() {
        // Scenario: 100 lines, "foo" on lines 10 and 50, -n -A1 -B1.
        let mut input = String::new();
        for i in 1..=100 {
            if i == 10 || i == 50 {
                input.push_str(&format!("line {i} foo\n"));
            } else {
                input.push_str(&format!("line {i}\n"));
            }
        }
        let options = ScanOptions {
            line_numbers: true,
            before_context: 1,
            after_context: 1,
            ..ScanOptions::default()
        };
        let (out, summary) = run(&input, &options, &["foo"]);
        let expected = "9-line 9\n10:line 10 foo\n11-line 11\n--\n49-line 49\n50:line 50 foo\n51-line 51\n";
        assert_eq!(out, expected);
        assert_eq!(summary.selected, 2);
    }

    #[test]
    fn test_contiguous_context_has_no_separator() {
        let options = ScanOptions {
            before_context: 2,
            after_context: 2,
            ..ScanOptions::default()
        };
        let (out, _) = run("a\nfoo\nb\nfoo\nc\n", &options, &["foo"]);
        // The second match sits inside the first match's after-context:
        // one contiguous chunk, no separator.
        assert_eq!(out, "a\nfoo\nb\nfoo\nc\n");
    }

    #[test]
    fn test_after_context_only() {
        let options = ScanOptions {
            after_context: 1,
            ..ScanOptions::default()
        };
        let (out, _) = run("foo\na\nb\nfoo\nc\n", &options, &["foo"]);
        assert_eq!(out, "foo\na\n--\nfoo\nc\n");
    }

    #[test]
    fn test_before_window_evicts_oldest() {
        let options = ScanOptions {
            before_context: 2,
            ..ScanOptions::default()
        };
        let (out, _) = run("1\n2\n3\n4\nfoo\n", &options, &["foo"]);
        assert_eq!(out, "3\n4\nfoo\n");
    }

    #[test]
    fn test_only_matching() {
        let options = ScanOptions {
            op: ScanOp::OnlyMatching,
            ..ScanOptions::default()
        };
        let (out, _) = run("say foo and foo again\nno\nfoo\n", &options, &["foo"]);
        assert_eq!(out, "foo\nfoo\nfoo\n");
    }

    #[test]
    fn test_only_matching_with_offsets() {
        let options = ScanOptions {
            op: ScanOp::OnlyMatching,
            byte_offsets: true,
            ..ScanOptions::default()
        };
        let (out, _) = run("xxfoo\nfoo\n", &options, &["foo"]);
        assert_eq!(out, "2:foo\n6:foo\n");
    }

    #[test]
    fn test_count_mode() {
        let options = ScanOptions {
            op: ScanOp::Count,
            ..ScanOptions::default()
        };
        let (out, summary) = run_labeled("a\nb\na\n", &options, &["a"], Some("f"));
        assert_eq!(out, "f:2\n");
        assert_eq!(summary.selected, 2);

        let (out, _) = run("a\nb\na\n", &options, &["a"]);
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_files_with_matches_stops_early() {
        let options = ScanOptions {
            op: ScanOp::FilesWithMatches,
            ..ScanOptions::default()
        };
        let (out, summary) = run_labeled("a\na\na\n", &options, &["a"], Some("hit.txt"));
        assert_eq!(out, "hit.txt\n");
        // Stopped after the first selected line.
        assert_eq!(summary.selected, 1);

        let (out, _) = run_labeled("b\n", &options, &["a"], Some("miss.txt"));
        assert_eq!(out, "");
    }

    #[test]
    fn test_files_without_match() {
        let options = ScanOptions {
            op: ScanOp::FilesWithoutMatch,
            ..ScanOptions::default()
        };
        let (out, _) = run_labeled("b\n", &options, &["a"], Some("miss.txt"));
        assert_eq!(out, "miss.txt\n");

        let (out, _) = run_labeled("a\n", &options, &["a"], Some("hit.txt"));
        assert_eq!(out, "");
    }

    #[test]
    fn test_quiet_counts_but_emits_nothing() {
        let options = ScanOptions {
            op: ScanOp::Quiet,
            ..ScanOptions::default()
        };
        let (out, summary) = run("a\na\n", &options, &["a"]);
        assert_eq!(out, "");
        assert_eq!(summary.selected, 1);
    }

    #[test]
    fn test_max_count() {
        let options = ScanOptions {
            max_count: Some(2),
            ..ScanOptions::default()
        };
        let (out, summary) = run("a\na\na\na\n", &options, &["a"]);
        assert_eq!(out, "a\na\n");
        assert_eq!(summary.selected, 2);
    }

    #[test]
    fn test_unterminated_last_line() {
        let (out, _) = run("a\nfinal", &ScanOptions::default(), &["final"]);
        assert_eq!(out, "final\n");
    }

    #[test]
    fn test_output_is_linewise_subset_of_input() {
        let input = "alpha\nbeta\ngamma\ndelta\n";
        let (out, _) = run(input, &ScanOptions::default(), &["a"]);
        let input_lines: Vec<&str> = input.lines().collect();
        for line in out.lines() {
            assert!(input_lines.contains(&line), "{line} not in input");
        }
    }

    #[test]
    fn test_search_selection_by_path_glob() {
        let searches = vec![
            Search::new("**.rs", "fn ", false).unwrap(),
            Search::new("**", "common", false).unwrap(),
        ];
        assert_eq!(select_regexes(&searches, "src/main.rs").len(), 2);
        assert_eq!(select_regexes(&searches, "notes.txt").len(), 1);
    }

    #[test]
    fn test_search_ignore_case() {
        let search = Search::new("**", "foo", true).unwrap();
        assert!(search.regex.is_match("FOO"));
    }

    #[test]
    fn test_bad_regex_is_config_error() {
        let err = Search::new("**", "(unclosed", false).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_resolve_encoding() {
        assert!(ScanOptions::resolve_encoding("latin1").is_ok());
        assert!(ScanOptions::resolve_encoding("utf-8").is_ok());
        assert!(matches!(
            ScanOptions::resolve_encoding("no-such-charset"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ScanOptions::resolve_encoding("utf-16le"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_latin1_decoding() {
        let options = ScanOptions {
            encoding: Some(encoding_rs::WINDOWS_1252),
            ..ScanOptions::default()
        };
        let regexes = [regex::Regex::new("caf\u{e9}").unwrap()];
        let mut out = Vec::new();
        let refs: Vec<&Regex> = regexes.iter().collect();
        let mut scanner = Scanner::new(refs, &options, None, &mut out);
        // "café" in latin-1: 63 61 66 E9.
        let summary = scanner.scan(&b"caf\xE9\n"[..]).unwrap();
        assert_eq!(summary.selected, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "caf\u{e9}\n");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Line numbering is stable across terminator styles.
            #[test]
            fn line_count_matches_terminators(lines in proptest::collection::vec("[a-z]{0,8}", 1..20)) {
                let input = lines.join("\n");
                let options = ScanOptions { inverted: true, op: ScanOp::Count, ..ScanOptions::default() };
                let (_, summary) = run(&input, &options, &["\u{0}impossible"]);
                // Every line is selected under inversion. A trailing
                // terminator does not open a final empty line.
                let expected = if input.is_empty() {
                    0
                } else {
                    let count = input.split('\n').count();
                    if input.ends_with('\n') { count - 1 } else { count }
                } as u64;
                prop_assert_eq!(summary.selected, expected);
            }

            /// Normal-mode output lines are a subset of input lines.
            #[test]
            fn output_subset_of_input(lines in proptest::collection::vec("[a-z ]{0,10}", 0..20), pat in "[a-z]") {
                let input = lines.join("\n");
                let (out, _) = run(&input, &ScanOptions::default(), &[pat.as_str()]);
                let input_lines: Vec<&str> = input.split('\n').collect();
                for line in out.lines() {
                    prop_assert!(input_lines.contains(&line));
                }
            }
        }
    }
}
