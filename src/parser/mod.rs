// Parser module: CREATE TABLE schemas (columns, keys) and INSERT rows from SQL dumps.

pub mod insert;
pub mod schema;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed statement: {0}")]
    Malformed(String),
}

// InsertRow is one value group of an INSERT statement.
// Values keep their SQL quoting; `unquote_literal` strips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRow {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<String>,
}

/// Strip SQL quoting from a literal. `None` means SQL NULL.
///
/// Handles both doubled quotes (`''`) and MySQL backslash escapes.
pub fn unquote_literal(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let quoted = v.len() >= 2
        && ((v.starts_with('\'') && v.ends_with('\'')) || (v.starts_with('"') && v.ends_with('"')));
    if !quoted {
        return Some(v.to_string());
    }
    let quote = v.as_bytes()[0] as char;
    let inner = &v[1..v.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some('Z') => out.push('\u{1a}'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Decode `0xCAFE` or `X'CAFE'` hex literals.
pub fn hex_literal(raw: &str) -> Option<Vec<u8>> {
    let v = raw.trim();
    let digits = if let Some(rest) = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        rest
    } else if (v.starts_with("X'") || v.starts_with("x'")) && v.ends_with('\'') && v.len() >= 3 {
        &v[2..v.len() - 1]
    } else {
        return None;
    };
    hex::decode(digits).ok()
}
