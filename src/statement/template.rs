use serde_json::{Map, Value};
use std::iter::Peekable;
use std::str::CharIndices;

use super::error::ParseError;

/// A SQL statement with `:name` placeholders compiled to positional `$N` parameters.
///
/// The same name always maps to the same position, so `:id` used twice binds once.
/// Text inside string literals, quoted identifiers and comments is copied verbatim,
/// and PostgreSQL `::type` casts are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    source: String,
    sql: String,
    params: Vec<String>,
}

impl SqlTemplate {
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ParseError::Template("empty SQL statement".to_string()));
        }

        let mut sql = String::with_capacity(source.len() + 8);
        let mut params: Vec<String> = Vec::new();
        let mut chars = source.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            match c {
                '\'' | '"' => {
                    sql.push(c);
                    copy_until(&mut chars, &mut sql, c)
                        .ok_or_else(|| ParseError::Template(format!("unterminated {} quote", c)))?;
                }
                '-' if next_is(&mut chars, '-') => {
                    sql.push(c);
                    for (_, ch) in chars.by_ref() {
                        sql.push(ch);
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                '/' if next_is(&mut chars, '*') => {
                    sql.push(c);
                    copy_block_comment(&mut chars, &mut sql)
                        .ok_or_else(|| ParseError::Template("unterminated block comment".to_string()))?;
                }
                ':' if next_is(&mut chars, ':') => {
                    sql.push_str("::");
                    chars.next();
                }
                ':' if chars.peek().map_or(false, |(_, n)| is_ident_start(*n)) => {
                    let mut name = String::new();
                    while let Some(&(_, n)) = chars.peek() {
                        if !is_ident_char(n) {
                            break;
                        }
                        name.push(n);
                        chars.next();
                    }
                    let position = match params.iter().position(|p| *p == name) {
                        Some(i) => i + 1,
                        None => {
                            params.push(name);
                            params.len()
                        }
                    };
                    sql.push('$');
                    sql.push_str(&position.to_string());
                }
                '$' if chars.peek().map_or(false, |(_, n)| n.is_ascii_digit()) => {
                    return Err(ParseError::Template(
                        "positional $N parameters are not supported, use :name placeholders".to_string(),
                    ));
                }
                _ => sql.push(c),
            }
        }

        Ok(Self {
            source: source.to_string(),
            sql,
            params,
        })
    }

    /// Statement text with positional parameters
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Statement text as written in the definition file
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in positional order
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn references(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    /// Collect argument values in positional order.
    /// Returns the first placeholder name that has no binding.
    pub fn arguments<'a>(&'a self, bindings: &'a Map<String, Value>) -> Result<Vec<&'a Value>, &'a str> {
        self.params
            .iter()
            .map(|name| bindings.get(name).ok_or(name.as_str()))
            .collect()
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn next_is(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    chars.peek().map_or(false, |(_, n)| *n == expected)
}

/// Copy characters through the closing `quote`. `None` when the input ends first.
fn copy_until(chars: &mut Peekable<CharIndices<'_>>, out: &mut String, quote: char) -> Option<()> {
    for (_, ch) in chars.by_ref() {
        out.push(ch);
        if ch == quote {
            return Some(());
        }
    }
    None
}

fn copy_block_comment(chars: &mut Peekable<CharIndices<'_>>, out: &mut String) -> Option<()> {
    // opening '*'
    let (_, star) = chars.next()?;
    out.push(star);
    let mut prev = '\0';
    for (_, ch) in chars.by_ref() {
        out.push(ch);
        if prev == '*' && ch == '/' {
            return Some(());
        }
        prev = ch;
    }
    None
}
