//! Minimal C-style format interpreter for the `-printf` action.
//!
//! Supported directives: `%[-][0][width][.precision]{s,d,i,x,X,o,c,%}`, plus
//! the escape sequences `\n`, `\t`, `\\` and `\0`. The number of arguments a
//! format consumes is its number of non-`%%` conversions.

use crate::{Error, Result};

/// Counts the arguments `format` consumes (non-`%%` conversions).
pub fn count_args(format: &str) -> Result<usize> {
    Ok(parse_directives(format)?
        .iter()
        .filter(|d| matches!(d, Directive::Conversion { .. }))
        .count())
}

/// Formats `args` according to `format`.
///
/// # Errors
///
/// Returns [`Error::Config`] for malformed formats and argument-count
/// mismatches.
pub fn format(format: &str, args: &[&str]) -> Result<String> {
    let directives = parse_directives(format)?;
    let expected = directives
        .iter()
        .filter(|d| matches!(d, Directive::Conversion { .. }))
        .count();
    if args.len() != expected {
        return Err(Error::Config(format!(
            "format '{format}' takes {expected} arguments, got {}",
            args.len()
        )));
    }

    let mut out = String::new();
    let mut next_arg = 0;
    for directive in &directives {
        match directive {
            Directive::Literal(text) => out.push_str(text),
            Directive::Conversion {
                left_align,
                zero_pad,
                width,
                precision,
                kind,
            } => {
                let arg = args[next_arg];
                next_arg += 1;
                let rendered = render(*kind, arg, *precision)?;
                out.push_str(&pad(&rendered, *width, *left_align, *zero_pad));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Str,
    Decimal,
    HexLower,
    HexUpper,
    Octal,
    Char,
}

#[derive(Debug, Clone)]
enum Directive {
    Literal(String),
    Conversion {
        left_align: bool,
        zero_pad: bool,
        width: usize,
        precision: Option<usize>,
        kind: Kind,
    },
}

fn parse_directives(format: &str) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                match chars.get(i + 1) {
                    Some('n') => literal.push('\n'),
                    Some('t') => literal.push('\t'),
                    Some('0') => literal.push('\0'),
                    Some('\\') => literal.push('\\'),
                    Some(&c) => {
                        return Err(Error::Config(format!(
                            "unknown escape '\\{c}' in format '{format}'"
                        )));
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "trailing backslash in format '{format}'"
                        )));
                    }
                }
                i += 2;
            }
            '%' => {
                i += 1;
                if chars.get(i) == Some(&'%') {
                    literal.push('%');
                    i += 1;
                    continue;
                }
                if !literal.is_empty() {
                    directives.push(Directive::Literal(std::mem::take(&mut literal)));
                }
                let mut left_align = false;
                let mut zero_pad = false;
                while let Some(&c) = chars.get(i) {
                    match c {
                        '-' => left_align = true,
                        '0' => zero_pad = true,
                        _ => break,
                    }
                    i += 1;
                }
                let mut width = 0usize;
                while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                    width = width * 10 + c.to_digit(10).unwrap() as usize;
                    i += 1;
                }
                let mut precision = None;
                if chars.get(i) == Some(&'.') {
                    i += 1;
                    let mut p = 0usize;
                    while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                        p = p * 10 + c.to_digit(10).unwrap() as usize;
                        i += 1;
                    }
                    precision = Some(p);
                }
                let kind = match chars.get(i) {
                    Some('s') => Kind::Str,
                    Some('d') | Some('i') => Kind::Decimal,
                    Some('x') => Kind::HexLower,
                    Some('X') => Kind::HexUpper,
                    Some('o') => Kind::Octal,
                    Some('c') => Kind::Char,
                    Some(&c) => {
                        return Err(Error::Config(format!(
                            "unknown conversion '%{c}' in format '{format}'"
                        )));
                    }
                    None => {
                        return Err(Error::Config(format!(
                            "incomplete conversion in format '{format}'"
                        )));
                    }
                };
                i += 1;
                directives.push(Directive::Conversion {
                    left_align,
                    zero_pad,
                    width,
                    precision,
                    kind,
                });
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        directives.push(Directive::Literal(literal));
    }
    Ok(directives)
}

fn render(kind: Kind, arg: &str, precision: Option<usize>) -> Result<String> {
    match kind {
        Kind::Str => {
            let mut s = arg.to_string();
            if let Some(p) = precision {
                s.truncate(p);
            }
            Ok(s)
        }
        Kind::Decimal => Ok(parse_int(arg).to_string()),
        Kind::HexLower => Ok(std::format!("{:x}", parse_int(arg))),
        Kind::HexUpper => Ok(std::format!("{:X}", parse_int(arg))),
        Kind::Octal => Ok(std::format!("{:o}", parse_int(arg))),
        Kind::Char => Ok(arg.chars().next().map(String::from).unwrap_or_default()),
    }
}

/// Numeric conversions on non-numeric values render 0, like missing
/// properties render empty strings.
fn parse_int(arg: &str) -> i64 {
    arg.trim().parse().unwrap_or(0)
}

fn pad(text: &str, width: usize, left_align: bool, zero_pad: bool) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let fill = width - len;
    if left_align {
        std::format!("{text}{}", " ".repeat(fill))
    } else if zero_pad {
        std::format!("{}{text}", "0".repeat(fill))
    } else {
        std::format!("{}{text}", " ".repeat(fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string() {
        assert_eq!(format("hello %s!", &["world"]).unwrap(), "hello world!");
    }

    #[test]
    fn test_decimal() {
        assert_eq!(format("%d bytes", &["1234"]).unwrap(), "1234 bytes");
        assert_eq!(format("%d", &["-5"]).unwrap(), "-5");
    }

    #[test]
    fn test_hex_octal() {
        assert_eq!(format("%x", &["255"]).unwrap(), "ff");
        assert_eq!(format("%X", &["255"]).unwrap(), "FF");
        assert_eq!(format("%o", &["8"]).unwrap(), "10");
    }

    #[test]
    fn test_char() {
        assert_eq!(format("%c", &["abc"]).unwrap(), "a");
        assert_eq!(format("%c", &[""]).unwrap(), "");
    }

    #[test]
    fn test_width_and_alignment() {
        assert_eq!(format("[%8s]", &["abc"]).unwrap(), "[     abc]");
        assert_eq!(format("[%-8s]", &["abc"]).unwrap(), "[abc     ]");
        assert_eq!(format("[%08d]", &["42"]).unwrap(), "[00000042]");
    }

    #[test]
    fn test_precision_truncates_strings() {
        assert_eq!(format("%.3s", &["abcdef"]).unwrap(), "abc");
    }

    #[test]
    fn test_percent_escape() {
        assert_eq!(format("100%%", &[]).unwrap(), "100%");
    }

    #[test]
    fn test_escapes() {
        assert_eq!(format("a\\tb\\n", &[]).unwrap(), "a\tb\n");
    }

    #[test]
    fn test_count_args() {
        assert_eq!(count_args("%s %d %% %x").unwrap(), 3);
        assert_eq!(count_args("no conversions").unwrap(), 0);
    }

    #[test]
    fn test_argument_count_mismatch() {
        assert!(matches!(format("%s %s", &["one"]), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_conversion_rejected() {
        assert!(matches!(format("%q", &["x"]), Err(Error::Config(_))));
        assert!(matches!(count_args("%q"), Err(Error::Config(_))));
    }

    #[test]
    fn test_non_numeric_renders_zero() {
        assert_eq!(format("%d", &["not a number"]).unwrap(), "0");
    }
}
