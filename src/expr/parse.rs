//! Parser from command-line tokens to expression trees.
//!
//! Implements the find-style grammar:
//!
//! ```text
//! expr   := or (',' or)*                     lowest precedence
//! or     := and (('-o'|'-or'|'||') and)*
//! and    := unary (('-a'|'-and'|'&&')? unary)*   implicit AND between terms
//! unary  := ('!'|'-not') unary | '(' expr ')' | primary
//! ```
//!
//! Primaries are the tests (`-name`, `-path`, `-type`, `-readable`,
//! `-writable`, `-executable`, `-size`, `-mtime`, `-mmin`, `-true`,
//! `-false`) and the actions (`-print`, `-echo`, `-printf`, `-ls`, `-exec`
//! ... `;`, `-pipe` ... `;`, `-cat`, `-copy [--mkdirs]`, `-digest`,
//! `-checksum`, `-disassemble`, `-prune`, `-delete`).
//!
//! When the parsed expression contains no action, an implicit `-print` is
//! appended (`expr -a -print`), matching the classic find contract.

use super::actions::{Action, ChecksumKind, DigestAlgorithm};
use super::template::Template;
use super::{AgeTest, Expr, SizeTest, printf};
use crate::glob::Pattern;
use crate::{Error, Result};

/// Parses expression tokens. An empty token list means plain `-print`.
pub fn parse(tokens: &[String]) -> Result<Expr> {
    if tokens.is_empty() {
        return Ok(Expr::Action(Action::Print));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.comma()?;
    if parser.pos != tokens.len() {
        return Err(Error::Config(format!(
            "unexpected token '{}'",
            tokens[parser.pos]
        )));
    }
    if expr.has_action() {
        Ok(expr)
    } else {
        Ok(Expr::And(
            Box::new(expr),
            Box::new(Expr::Action(Action::Print)),
        ))
    }
}

struct Parser<'t> {
    tokens: &'t [String],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&str> {
        let token = self.tokens.get(self.pos).map(String::as_str);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the argument of the predicate named `owner`.
    fn arg(&mut self, owner: &str) -> Result<&str> {
        self.next()
            .ok_or_else(|| Error::Config(format!("'{owner}' needs an argument")))
    }

    fn comma(&mut self) -> Result<Expr> {
        let mut expr = self.or()?;
        while self.peek() == Some(",") {
            self.pos += 1;
            let right = self.or()?;
            expr = Expr::Comma(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut expr = self.and()?;
        while matches!(self.peek(), Some("-o" | "-or" | "||")) {
            self.pos += 1;
            let right = self.and()?;
            expr = Expr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;
        loop {
            match self.peek() {
                Some("-a" | "-and" | "&&") => {
                    self.pos += 1;
                }
                Some(token) if starts_term(token) => {}
                _ => break,
            }
            let right = self.unary()?;
            expr = Expr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some("!") | Some("-not") => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some("(") => {
                self.pos += 1;
                let inner = self.comma()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err(Error::Config("missing ')'".into())),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self
            .next()
            .ok_or_else(|| Error::Config("expected a test or action".into()))?
            .to_string();
        match token.as_str() {
            "-true" => Ok(Expr::Const(true)),
            "-false" => Ok(Expr::Const(false)),

            "-name" => Ok(Expr::Glob {
                prop: "name",
                pattern: Pattern::new(self.arg("-name")?)?,
            }),
            "-path" => Ok(Expr::Glob {
                prop: "path",
                pattern: Pattern::new(self.arg("-path")?)?,
            }),
            "-type" => Ok(Expr::Glob {
                prop: "type",
                pattern: Pattern::new(self.arg("-type")?)?,
            }),
            "-readable" => Ok(Expr::PropTrue("readable".into())),
            "-writable" => Ok(Expr::PropTrue("writable".into())),
            "-executable" => Ok(Expr::PropTrue("executable".into())),
            "-size" => Ok(Expr::Size(SizeTest::parse(self.arg("-size")?)?)),
            "-mtime" => Ok(Expr::Age(AgeTest::parse(self.arg("-mtime")?, 86_400)?)),
            "-mmin" => Ok(Expr::Age(AgeTest::parse(self.arg("-mmin")?, 60)?)),

            "-print" => Ok(Expr::Action(Action::Print)),
            "-echo" => Ok(Expr::Action(Action::Echo(Template::parse(
                self.arg("-echo")?,
            )?))),
            "-printf" => {
                let format = self.arg("-printf")?.to_string();
                let count = printf::count_args(&format)?;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(self.arg("-printf")?.to_string());
                }
                Ok(Expr::Action(Action::Printf { format, args }))
            }
            "-ls" => Ok(Expr::Action(Action::Ls)),
            "-exec" => Ok(Expr::Action(Action::Exec(self.command_words("-exec")?))),
            "-pipe" => Ok(Expr::Action(Action::Pipe(self.command_words("-pipe")?))),
            "-cat" => Ok(Expr::Action(Action::Cat)),
            "-copy" => {
                let mkdirs = self.peek() == Some("--mkdirs");
                if mkdirs {
                    self.pos += 1;
                }
                let target = Template::parse(self.arg("-copy")?)?;
                Ok(Expr::Action(Action::Copy { target, mkdirs }))
            }
            "-digest" => Ok(Expr::Action(Action::Digest(DigestAlgorithm::parse(
                self.arg("-digest")?,
            )?))),
            "-checksum" => Ok(Expr::Action(Action::Checksum(ChecksumKind::parse(
                self.arg("-checksum")?,
            )?))),
            "-disassemble" => Ok(Expr::Action(Action::Disassemble)),
            "-prune" => Ok(Expr::Action(Action::Prune)),
            "-delete" => Ok(Expr::Action(Action::Delete)),

            other => Err(Error::Config(format!("unknown predicate '{other}'"))),
        }
    }

    /// Collects the words of `-exec`/`-pipe` up to the terminating `;`.
    fn command_words(&mut self, owner: &str) -> Result<Vec<Template>> {
        let mut words = Vec::new();
        loop {
            match self.next() {
                Some(";") => break,
                Some(word) => words.push(Template::parse(word)?),
                None => {
                    return Err(Error::Config(format!(
                        "'{owner}' command not terminated with ';'"
                    )));
                }
            }
        }
        if words.is_empty() {
            return Err(Error::Config(format!("'{owner}' needs a command")));
        }
        Ok(words)
    }
}

/// Whether a token can begin a term (for implicit AND).
fn starts_term(token: &str) -> bool {
    matches!(token, "(" | "!" | "-not") || (token.starts_with('-') && token.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_empty_is_print() {
        let expr = parse(&[]).unwrap();
        assert!(matches!(expr, Expr::Action(Action::Print)));
    }

    #[test]
    fn test_single_test_gets_implicit_print() {
        let expr = parse(&toks(&["-name", "*.rs"])).unwrap();
        match expr {
            Expr::And(left, right) => {
                assert!(matches!(*left, Expr::Glob { prop: "name", .. }));
                assert!(matches!(*right, Expr::Action(Action::Print)));
            }
            other => panic!("expected implicit -print wrap, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_action_not_wrapped() {
        let expr = parse(&toks(&["-name", "*.rs", "-cat"])).unwrap();
        match expr {
            Expr::And(_, right) => assert!(matches!(*right, Expr::Action(Action::Cat))),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_implicit_and() {
        let expr = parse(&toks(&["-name", "*.rs", "-size", "+1K", "-print"])).unwrap();
        // ((name AND size) AND print)
        match expr {
            Expr::And(left, right) => {
                assert!(matches!(*right, Expr::Action(Action::Print)));
                assert!(matches!(*left, Expr::And(_, _)));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_explicit_operators() {
        for op in ["-a", "-and", "&&"] {
            let expr = parse(&toks(&["-true", op, "-print"])).unwrap();
            assert!(matches!(expr, Expr::And(_, _)));
        }
        for op in ["-o", "-or", "||"] {
            let expr = parse(&toks(&["-print", op, "-print"])).unwrap();
            assert!(matches!(expr, Expr::Or(_, _)));
        }
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        // -true -false -o -print  ==  (-true AND -false) OR -print
        let expr = parse(&toks(&["-true", "-false", "-o", "-print"])).unwrap();
        match expr {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::And(_, _)));
                assert!(matches!(*right, Expr::Action(Action::Print)));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_comma_binds_loosest() {
        let expr = parse(&toks(&["-print", ",", "-print", "-o", "-print"])).unwrap();
        match expr {
            Expr::Comma(_, right) => assert!(matches!(*right, Expr::Or(_, _))),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_not_and_parens() {
        let expr = parse(&toks(&["!", "(", "-name", "*.o", ")", "-print"])).unwrap();
        match expr {
            Expr::And(left, _) => assert!(matches!(*left, Expr::Not(_))),
            other => panic!("{other:?}"),
        }
        let expr = parse(&toks(&["-not", "-name", "*.o"])).unwrap();
        match expr {
            Expr::And(left, _) => assert!(matches!(*left, Expr::Not(_))),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_scenario_expression() {
        // (-name '*.class' -and -size +1K) -or (-type 'archive-*' -and -prune)
        let expr = parse(&toks(&[
            "(", "-name", "*.class", "-and", "-size", "+1K", ")", "-or", "(", "-type",
            "archive-*", "-and", "-prune", ")",
        ]))
        .unwrap();
        match expr {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::And(_, _)));
                match *right {
                    Expr::And(_, action) => {
                        assert!(matches!(*action, Expr::Action(Action::Prune)));
                    }
                    other => panic!("{other:?}"),
                }
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_exec_words_until_semicolon() {
        let expr = parse(&toks(&["-exec", "file", "${path}", ";"])).unwrap();
        match expr {
            Expr::Action(Action::Exec(words)) => assert_eq!(words.len(), 2),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_exec_unterminated_rejected() {
        let err = parse(&toks(&["-exec", "file"])).unwrap_err();
        assert!(err.to_string().contains("';'"));
    }

    #[test]
    fn test_printf_consumes_by_conversion_count() {
        let expr = parse(&toks(&["-printf", "%s %d\\n", "name", "size"])).unwrap();
        match expr {
            Expr::Action(Action::Printf { args, .. }) => {
                assert_eq!(args, vec!["name".to_string(), "size".to_string()]);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_copy_with_mkdirs() {
        let expr = parse(&toks(&["-copy", "--mkdirs", "out/${name}"])).unwrap();
        match expr {
            Expr::Action(Action::Copy { mkdirs, .. }) => assert!(mkdirs),
            other => panic!("{other:?}"),
        }
        let expr = parse(&toks(&["-copy", "out/${name}"])).unwrap();
        match expr {
            Expr::Action(Action::Copy { mkdirs, .. }) => assert!(!mkdirs),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn test_missing_argument_rejected() {
        assert!(parse(&toks(&["-name"])).is_err());
        assert!(parse(&toks(&["-size"])).is_err());
    }

    #[test]
    fn test_unknown_predicate_rejected() {
        let err = parse(&toks(&["-frobnicate"])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("-frobnicate"));
    }

    #[test]
    fn test_unbalanced_paren_rejected() {
        assert!(parse(&toks(&["(", "-print"])).is_err());
        assert!(parse(&toks(&["-print", ")"])).is_err());
    }

    #[test]
    fn test_bad_digest_rejected_at_parse_time() {
        let err = parse(&toks(&["-digest", "crc7"])).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_checksum_kinds() {
        let expr = parse(&toks(&["-checksum", "ADLER32"])).unwrap();
        assert!(matches!(
            expr,
            Expr::Action(Action::Checksum(ChecksumKind::Adler32))
        ));
    }
}
