//! Glob patterns over traversal paths.
//!
//! The dialect understood here is the one used by `-name`, `-path`, `-type`,
//! `--look-into`, `--include`/`--exclude`, and the packer's rename rules:
//!
//! - `*` matches any run of characters within one path segment;
//! - `**` matches zero or more whole segments;
//! - `?` matches exactly one character within a segment;
//! - `[abc]`, `[a-z]`, `[!a-z]` match character classes within a segment;
//! - `,` separates alternatives;
//! - `~` prefixing an alternative negates it;
//! - `/`, `!` and `%` are literal separators: wildcards never cross them.
//!
//! The separators carry the path-encoding meaning of the traversal: `/` within
//! containers, `!` between an archive and its entry, `%` after a compressed
//! stream. `dist/**.jar!**.class` therefore matches any `.class` entry of any
//! `.jar` below `dist`.
//!
//! # Alternation semantics
//!
//! Alternatives are evaluated left to right and the *last* one that matches
//! decides ("later wins"), so `**.txt,~**/secret.txt` matches every `.txt`
//! path except `secret.txt` files. If no alternative matches, the result is
//! `false` — unless every alternative is negated, in which case the pattern
//! is a pure exclusion list and the default is `true`.
//!
//! [`PatternList`] applies the same later-wins rule across several patterns,
//! which is exactly the `--include`/`--exclude` accumulation order of the
//! command line.

use regex::Regex;

use crate::{Error, Result};

/// Characters that delimit path segments in the traversal's path encoding.
const SEPARATORS: &str = "/!%";

/// One compiled alternative of a pattern.
#[derive(Debug, Clone)]
struct Alternative {
    negated: bool,
    regex: Regex,
}

/// A compiled glob pattern (possibly with `,` alternatives and `~` negations).
///
/// # Example
///
/// ```rust
/// use spelunk::glob::Pattern;
///
/// let p = Pattern::new("**.jar!**.class").unwrap();
/// assert!(p.matches("lib/app.jar!com/x/Main.class"));
/// assert!(!p.matches("lib/app.jar!banner.txt"));
///
/// let p = Pattern::new("*.txt,~secret.txt").unwrap();
/// assert!(p.matches("notes.txt"));
/// assert!(!p.matches("secret.txt"));
/// ```
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    alternatives: Vec<Alternative>,
}

impl Pattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadPattern`] for empty patterns, empty alternatives,
    /// and unterminated character classes.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::BadPattern {
                pattern: pattern.into(),
                reason: "empty pattern".into(),
            });
        }
        let mut alternatives = Vec::new();
        for alt in split_alternatives(pattern) {
            let (negated, body) = match alt.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, alt.as_str()),
            };
            if body.is_empty() {
                return Err(Error::BadPattern {
                    pattern: pattern.into(),
                    reason: "empty alternative".into(),
                });
            }
            let regex_src = translate(body).map_err(|reason| Error::BadPattern {
                pattern: pattern.into(),
                reason,
            })?;
            let regex = Regex::new(&regex_src).map_err(|e| Error::BadPattern {
                pattern: pattern.into(),
                reason: e.to_string(),
            })?;
            alternatives.push(Alternative { negated, regex });
        }
        Ok(Self {
            source: pattern.into(),
            alternatives,
        })
    }

    /// Returns the source text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests a path against this pattern with later-wins alternation.
    pub fn matches(&self, path: &str) -> bool {
        let mut result = self.alternatives.iter().all(|a| a.negated);
        for alt in &self.alternatives {
            if alt.regex.is_match(path) {
                result = !alt.negated;
            }
        }
        result
    }

    /// Rewrites `path` using the first (non-negated) alternative that matches,
    /// substituting `$1`..`$n` in `replacement` with wildcard captures.
    ///
    /// Returns `None` when nothing matched. Used by the archive packer's
    /// rename rules.
    pub fn rewrite(&self, path: &str, replacement: &str) -> Option<String> {
        for alt in &self.alternatives {
            if alt.negated {
                continue;
            }
            if let Some(caps) = alt.regex.captures(path) {
                let mut out = String::new();
                caps.expand(replacement, &mut out);
                return Some(out);
            }
        }
        None
    }
}

/// An ordered list of patterns with later-wins semantics across the list.
///
/// An empty list matches everything (no restriction). The `--include` /
/// `--exclude` options of spgrep append `pat` and `~pat` respectively, so the
/// last option mentioning a path decides.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    /// Creates an empty list (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and appends a pattern.
    pub fn add(&mut self, pattern: &str) -> Result<()> {
        self.patterns.push(Pattern::new(pattern)?);
        Ok(())
    }

    /// Compiles and appends a negated pattern (`--exclude`).
    pub fn add_negated(&mut self, pattern: &str) -> Result<()> {
        self.patterns.push(Pattern::new(&format!("~{pattern}"))?);
        Ok(())
    }

    /// Returns `true` if no patterns were added.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Tests a path: the last pattern with an opinion wins; with no match the
    /// default is `true` when the list is empty or purely negated, `false`
    /// otherwise.
    pub fn matches(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let mut result = self
            .patterns
            .iter()
            .all(|p| p.alternatives.iter().all(|a| a.negated));
        for pattern in &self.patterns {
            for alt in &pattern.alternatives {
                if alt.regex.is_match(path) {
                    result = !alt.negated;
                }
            }
        }
        result
    }
}

/// Splits on top-level commas; commas inside `[...]` classes are literal.
fn split_alternatives(pattern: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_class = false;
    for ch in pattern.chars() {
        match ch {
            '[' if !in_class => {
                in_class = true;
                current.push(ch);
            }
            ']' if in_class => {
                in_class = false;
                current.push(ch);
            }
            ',' if !in_class => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

/// Translates one glob alternative into an anchored regex.
///
/// Wildcards become capture groups so [`Pattern::rewrite`] can reference them
/// as `$1`..`$n`.
fn translate(glob: &str) -> std::result::Result<String, String> {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    // `**` crosses segment separators.
                    out.push_str("(.*)");
                    i += 2;
                } else {
                    out.push_str(&format!("([^{}]*)", regex_escape_class(SEPARATORS)));
                    i += 1;
                }
            }
            '?' => {
                out.push_str(&format!("([^{}])", regex_escape_class(SEPARATORS)));
                i += 1;
            }
            '[' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| "unterminated character class".to_string())?;
                let class: String = chars[i + 1..i + 1 + end].iter().collect();
                if class.is_empty() {
                    return Err("empty character class".into());
                }
                let body = match class.strip_prefix('!') {
                    Some(rest) => format!("^{rest}"),
                    None => class,
                };
                out.push_str(&format!("([{body}])"));
                i += end + 2;
            }
            c => {
                if regex_syntax_meta(c) {
                    out.push('\\');
                }
                out.push(c);
                i += 1;
            }
        }
    }
    out.push('$');
    Ok(out)
}

fn regex_syntax_meta(c: char) -> bool {
    matches!(
        c,
        '\\' | '.' | '+' | '(' | ')' | '|' | '^' | '$' | '{' | '}' | '[' | ']' | '*' | '?'
    )
}

fn regex_escape_class(chars: &str) -> String {
    chars
        .chars()
        .map(|c| format!("\\{c}"))
        .collect::<String>()
}
