//! Typed boolean expression trees over node property maps.
//!
//! An [`Expr`] is an immutable algebraic value built once (usually by
//! [`parse`]) and evaluated per visited node. Evaluation is referentially
//! transparent except for [`Action`] nodes; the short-circuit operators never
//! evaluate their right operand when the left already decides, and `,`
//! evaluates both sides and yields the right one.
//!
//! Tests over missing properties never raise: a glob against an undefined
//! property matches the empty string, a size test on a node without `size`
//! compares against 0.

mod actions;
mod parse;
mod printf;
mod template;

pub use actions::{Action, ChecksumKind, DigestAlgorithm, EvalCtx};
pub use parse::parse;
pub use template::Template;

use std::time::SystemTime;

use crate::glob::Pattern;
use crate::walk::Node;
use crate::{Error, Result};

/// Numeric comparison direction, from the `[+-]N` prefix convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    /// `+N`: strictly greater.
    Greater,
    /// `-N`: strictly less.
    Less,
    /// `N`: exactly equal.
    Exact,
}

impl Cmp {
    fn holds(&self, actual: i64, reference: i64) -> bool {
        match self {
            Cmp::Greater => actual > reference,
            Cmp::Less => actual < reference,
            Cmp::Exact => actual == reference,
        }
    }
}

/// A `-size [+-]N[KMG]` test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTest {
    /// Comparison direction.
    pub cmp: Cmp,
    /// Reference size in bytes.
    pub bytes: i64,
}

impl SizeTest {
    /// Parses `-size` syntax: optional sign, digits, optional K/M/G unit.
    pub fn parse(spec: &str) -> Result<Self> {
        let (cmp, rest) = split_sign(spec);
        let (digits, unit) = match rest.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
            Some((idx, _)) => rest.split_at(idx),
            None => (rest, ""),
        };
        let value: i64 = digits.parse().map_err(|_| bad_number("size", spec))?;
        let multiplier = match unit.to_uppercase().as_str() {
            "" => 1,
            "K" => 1024,
            "M" => 1024 * 1024,
            "G" => 1024 * 1024 * 1024,
            _ => return Err(bad_number("size", spec)),
        };
        Ok(Self {
            cmp,
            bytes: value * multiplier,
        })
    }
}

/// A `-mtime ±N` / `-mmin ±N` test: node age in whole units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeTest {
    /// Comparison direction.
    pub cmp: Cmp,
    /// Reference age, in `unit_secs` units.
    pub amount: i64,
    /// Seconds per unit (86400 for days, 60 for minutes).
    pub unit_secs: i64,
}

impl AgeTest {
    /// Parses `±N` with the given unit length.
    pub fn parse(spec: &str, unit_secs: i64) -> Result<Self> {
        let (cmp, rest) = split_sign(spec);
        let amount: i64 = rest.parse().map_err(|_| bad_number("age", spec))?;
        Ok(Self {
            cmp,
            amount,
            unit_secs,
        })
    }

    fn holds(&self, modified: SystemTime, now: SystemTime) -> bool {
        let age_secs = now
            .duration_since(modified)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.cmp.holds(age_secs / self.unit_secs, self.amount)
    }
}

fn split_sign(spec: &str) -> (Cmp, &str) {
    match spec.as_bytes().first() {
        Some(b'+') => (Cmp::Greater, &spec[1..]),
        Some(b'-') => (Cmp::Less, &spec[1..]),
        _ => (Cmp::Exact, spec),
    }
}

fn bad_number(what: &str, spec: &str) -> Error {
    Error::Config(format!("invalid {what} argument '{spec}'"))
}

/// An immutable expression tree node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Constant truth value (`-true` / `-false`).
    Const(bool),
    /// Logical negation.
    Not(Box<Expr>),
    /// Short-circuit conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Sequence: evaluate left, discard, yield right.
    Comma(Box<Expr>, Box<Expr>),
    /// True iff the named property is truthy.
    PropTrue(String),
    /// Glob over a string property (`-name`, `-path`, `-type`).
    Glob {
        /// Property read from the node.
        prop: &'static str,
        /// Pattern tested against the rendered value.
        pattern: Pattern,
    },
    /// `-size` test.
    Size(SizeTest),
    /// `-mtime` / `-mmin` test.
    Age(AgeTest),
    /// A side-effecting action.
    Action(Action),
}

impl Expr {
    /// Evaluates the tree on a node.
    pub fn eval(&self, node: &mut Node<'_>, ctx: &mut EvalCtx<'_>) -> Result<bool> {
        match self {
            Expr::Const(value) => Ok(*value),
            Expr::Not(inner) => Ok(!inner.eval(node, ctx)?),
            Expr::And(left, right) => {
                if !left.eval(node, ctx)? {
                    return Ok(false);
                }
                right.eval(node, ctx)
            }
            Expr::Or(left, right) => {
                if left.eval(node, ctx)? {
                    return Ok(true);
                }
                right.eval(node, ctx)
            }
            Expr::Comma(left, right) => {
                left.eval(node, ctx)?;
                right.eval(node, ctx)
            }
            Expr::PropTrue(name) => {
                Ok(node.get(name)?.map(|v| v.truthy()).unwrap_or(false))
            }
            Expr::Glob { prop, pattern } => {
                let value = node.get_str(prop)?;
                Ok(pattern.matches(&value))
            }
            Expr::Size(test) => Ok(test.cmp.holds(node.size()?, test.bytes)),
            Expr::Age(test) => {
                match node.get("lastModifiedDate")?.and_then(|v| v.as_date()) {
                    Some(modified) => Ok(test.holds(modified, SystemTime::now())),
                    None => Ok(false),
                }
            }
            Expr::Action(action) => action.run(node, ctx),
        }
    }

    /// Whether the tree contains at least one action node.
    ///
    /// The command line appends an implicit `-print` when this is false.
    pub fn has_action(&self) -> bool {
        match self {
            Expr::Action(_) => true,
            Expr::Not(inner) => inner.has_action(),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Comma(l, r) => {
                l.has_action() || r.has_action()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::{Visitor, Walker};
    use std::fs::File;
    use std::io::Write as _;

    fn name_glob(pattern: &str) -> Expr {
        Expr::Glob {
            prop: "name",
            pattern: Pattern::new(pattern).unwrap(),
        }
    }

    /// Evaluates `expr` against a single scratch file node, returning the
    /// verdict and anything printed.
    fn eval_on_file(expr: &Expr, name: &str, contents: &[u8]) -> (bool, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(contents).unwrap();

        let mut out = Vec::new();
        let mut verdict = None;
        {
            struct Eval<'a> {
                expr: &'a Expr,
                out: &'a mut Vec<u8>,
                verdict: &'a mut Option<bool>,
            }
            impl Visitor for Eval<'_> {
                fn visit(&mut self, node: &mut Node<'_>) -> Result<()> {
                    let mut ctx = EvalCtx::new(self.out);
                    *self.verdict = Some(self.expr.eval(node, &mut ctx)?);
                    Ok(())
                }
            }
            let mut visitor = Eval {
                expr,
                out: &mut out,
                verdict: &mut verdict,
            };
            Walker::new().scan_path(&path, &mut visitor).unwrap();
        }
        (verdict.unwrap(), String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_const() {
        let (verdict, _) = eval_on_file(&Expr::Const(true), "f", b"");
        assert!(verdict);
        let (verdict, _) = eval_on_file(&Expr::Const(false), "f", b"");
        assert!(!verdict);
    }

    #[test]
    fn test_not() {
        let expr = Expr::Not(Box::new(Expr::Const(false)));
        assert!(eval_on_file(&expr, "f", b"").0);
    }

    #[test]
    fn test_name_glob() {
        let (verdict, _) = eval_on_file(&name_glob("*.txt"), "notes.txt", b"");
        assert!(verdict);
        let (verdict, _) = eval_on_file(&name_glob("*.txt"), "notes.md", b"");
        assert!(!verdict);
    }

    #[test]
    fn test_type_glob() {
        let expr = Expr::Glob {
            prop: "type",
            pattern: Pattern::new("normal-*").unwrap(),
        };
        assert!(eval_on_file(&expr, "f.txt", b"x").0);
    }

    #[test]
    fn test_glob_on_missing_property_matches_empty() {
        let expr = Expr::Glob {
            prop: "name",
            pattern: Pattern::new("*").unwrap(),
        };
        // "*" matches the empty string, so this is true even for a property
        // that renders empty; a non-empty literal is not.
        assert!(eval_on_file(&expr, "f", b"").0);
        let expr = Expr::Glob {
            prop: "archiveFormat",
            pattern: Pattern::new("zip").unwrap(),
        };
        assert!(!eval_on_file(&expr, "f", b"").0);
    }

    #[test]
    fn test_prop_true() {
        assert!(eval_on_file(&Expr::PropTrue("readable".into()), "f", b"").0);
        assert!(!eval_on_file(&Expr::PropTrue("no-such-prop".into()), "f", b"").0);
    }

    #[test]
    fn test_and_short_circuit() {
        // The right side would fail (cat on an already-consumed stream is
        // fine here; use an action whose side effect is observable instead).
        let expr = Expr::And(
            Box::new(Expr::Const(false)),
            Box::new(Expr::Action(Action::Print)),
        );
        let (verdict, out) = eval_on_file(&expr, "f", b"");
        assert!(!verdict);
        assert!(out.is_empty(), "right operand must not run");
    }

    #[test]
    fn test_or_short_circuit() {
        let expr = Expr::Or(
            Box::new(Expr::Const(true)),
            Box::new(Expr::Action(Action::Print)),
        );
        let (verdict, out) = eval_on_file(&expr, "f", b"");
        assert!(verdict);
        assert!(out.is_empty(), "right operand must not run");
    }

    #[test]
    fn test_comma_evaluates_both_yields_right() {
        let expr = Expr::Comma(
            Box::new(Expr::Action(Action::Print)),
            Box::new(Expr::Const(false)),
        );
        let (verdict, out) = eval_on_file(&expr, "f", b"");
        assert!(!verdict, "comma yields the right result");
        assert!(!out.is_empty(), "left side ran");
    }

    #[test]
    fn test_size_exact_and_ranges() {
        let expr = Expr::Size(SizeTest::parse("5").unwrap());
        assert!(eval_on_file(&expr, "f", b"12345").0);
        assert!(!eval_on_file(&expr, "f", b"1234").0);

        let expr = Expr::Size(SizeTest::parse("+4").unwrap());
        assert!(eval_on_file(&expr, "f", b"12345").0);
        assert!(!eval_on_file(&expr, "f", b"1234").0);

        let expr = Expr::Size(SizeTest::parse("-1K").unwrap());
        assert!(eval_on_file(&expr, "f", b"small").0);
    }

    #[test]
    fn test_size_units() {
        assert_eq!(SizeTest::parse("+1K").unwrap().bytes, 1024);
        assert_eq!(SizeTest::parse("2M").unwrap().bytes, 2 * 1024 * 1024);
        assert_eq!(SizeTest::parse("-1g").unwrap().bytes, 1024 * 1024 * 1024);
        assert_eq!(SizeTest::parse("+1K").unwrap().cmp, Cmp::Greater);
        assert!(SizeTest::parse("1X").is_err());
        assert!(SizeTest::parse("").is_err());
    }

    #[test]
    fn test_age_parse() {
        let test = AgeTest::parse("+7", 86_400).unwrap();
        assert_eq!(test.cmp, Cmp::Greater);
        assert_eq!(test.amount, 7);
        assert!(AgeTest::parse("x", 60).is_err());
    }

    #[test]
    fn test_age_against_fresh_file() {
        // A file written just now is 0 days old.
        let expr = Expr::Age(AgeTest::parse("0", 86_400).unwrap());
        assert!(eval_on_file(&expr, "f", b"").0);
        let expr = Expr::Age(AgeTest::parse("+0", 86_400).unwrap());
        assert!(!eval_on_file(&expr, "f", b"").0);
        let expr = Expr::Age(AgeTest::parse("-5", 60).unwrap());
        assert!(eval_on_file(&expr, "f", b"").0);
    }

    #[test]
    fn test_age_holds() {
        let now = SystemTime::now();
        let two_days_ago = now - std::time::Duration::from_secs(2 * 86_400 + 30);
        let test = AgeTest::parse("2", 86_400).unwrap();
        assert!(test.holds(two_days_ago, now));
        let test = AgeTest::parse("+1", 86_400).unwrap();
        assert!(test.holds(two_days_ago, now));
        let test = AgeTest::parse("-2", 86_400).unwrap();
        assert!(!test.holds(two_days_ago, now));
    }

    #[test]
    fn test_has_action() {
        assert!(!name_glob("*").has_action());
        assert!(Expr::Action(Action::Print).has_action());
        assert!(
            Expr::And(
                Box::new(name_glob("*")),
                Box::new(Expr::Action(Action::Print))
            )
            .has_action()
        );
        assert!(
            Expr::Not(Box::new(Expr::Action(Action::Prune))).has_action()
        );
    }
}
