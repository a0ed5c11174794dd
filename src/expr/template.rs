//! `${name}` template substitution over node properties.
//!
//! Two variable syntaxes are accepted: bare `$name`, where the name is an
//! identifier (`[A-Za-z_][A-Za-z0-9_]*`), and braced `${name}`, where the
//! name may additionally contain dashes and dots (`${archive-format}`,
//! `${name.sub}`). A `$` at the very end of the template, or one not followed
//! by a valid variable start, stays literal. Undefined properties substitute
//! as the empty string.

use crate::walk::Node;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Variable(String),
}

/// A parsed substitution template.
///
/// # Example
///
/// ```rust
/// use spelunk::expr::Template;
///
/// let t = Template::parse("$name is ${size} bytes").unwrap();
/// assert_eq!(t.source(), "$name is ${size} bytes");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unterminated `${`.
    pub fn parse(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let chars: Vec<char> = source.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != '$' {
                literal.push(chars[i]);
                i += 1;
                continue;
            }
            match chars.get(i + 1) {
                Some('{') => {
                    let end = chars[i + 2..]
                        .iter()
                        .position(|&c| c == '}')
                        .ok_or_else(|| {
                            Error::Config(format!("unterminated '${{' in template '{source}'"))
                        })?;
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Variable(name));
                    i += end + 3;
                }
                Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
                    let mut end = i + 1;
                    while end < chars.len()
                        && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                    {
                        end += 1;
                    }
                    let name: String = chars[i + 1..end].iter().collect();
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Variable(name));
                    i = end;
                }
                _ => {
                    // Trailing '$' or '$' before an invalid start: literal.
                    literal.push('$');
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// The template's source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expands the template against a node's properties.
    pub fn expand(&self, node: &mut Node<'_>) -> Result<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Variable(name) => out.push_str(&node.get_str(name)?),
            }
        }
        Ok(out)
    }
}
