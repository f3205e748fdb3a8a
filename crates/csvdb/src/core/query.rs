//! Query splitting for pagination rewrites and the parameter value type.

use std::fmt;

use crate::error::{Result, TransferError};

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// Render as text for drivers that bind everything as strings.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlParam::Null => None,
            SqlParam::Bool(b) => Some(b.to_string()),
            SqlParam::Int(i) => Some(i.to_string()),
            SqlParam::Float(f) => Some(f.to_string()),
            SqlParam::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Text(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        SqlParam::Text(s)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// A SELECT statement cut into the pieces a pagination rewrite needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectParts {
    /// Leading `WITH ...` chain, without the main SELECT.
    pub with_prefix: Option<String>,
    /// The main statement, from `SELECT` up to (not including) `ORDER BY`.
    pub body: String,
    /// Trailing `ORDER BY ...` clause, including the keywords.
    pub order_by: Option<String>,
}

impl SelectParts {
    /// Split `sql` at its top-level `WITH` prefix and trailing `ORDER BY`.
    /// Keywords inside parentheses, quoted strings or quoted identifiers are
    /// ignored.
    pub fn split(sql: &str) -> Result<Self> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        if sql.is_empty() {
            return Err(TransferError::spec("cannot paginate an empty query"));
        }

        let words = top_level_words(sql)?;

        let (with_prefix, rest_start) = match words.first() {
            Some((0, w)) if w.eq_ignore_ascii_case("with") => {
                let select = words
                    .iter()
                    .find(|(_, w)| w.eq_ignore_ascii_case("select"))
                    .map(|(pos, _)| *pos)
                    .ok_or_else(|| {
                        TransferError::spec("WITH clause is not followed by a SELECT")
                    })?;
                (Some(sql[..select].trim_end().to_string()), select)
            }
            _ => (None, 0),
        };

        let mut order_pos = None;
        for pair in words.windows(2) {
            let (pos, first) = &pair[0];
            let (_, second) = &pair[1];
            if *pos >= rest_start
                && first.eq_ignore_ascii_case("order")
                && second.eq_ignore_ascii_case("by")
            {
                order_pos = Some(*pos);
            }
        }

        let (body, order_by) = match order_pos {
            Some(pos) => (
                sql[rest_start..pos].trim().to_string(),
                Some(sql[pos..].trim().to_string()),
            ),
            None => (sql[rest_start..].trim().to_string(), None),
        };

        Ok(Self {
            with_prefix,
            body,
            order_by,
        })
    }

    /// Reassemble with `tail` appended after the ORDER BY clause.
    pub fn assemble(&self, body: &str, tail: &str) -> String {
        let mut out = String::new();
        if let Some(prefix) = &self.with_prefix {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(body);
        if let Some(order) = &self.order_by {
            out.push(' ');
            out.push_str(order);
        }
        if !tail.is_empty() {
            out.push(' ');
            out.push_str(tail);
        }
        out
    }
}

impl fmt::Display for SelectParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.assemble(&self.body, ""))
    }
}

/// Byte offsets and text of every bare word at nesting depth zero.
fn top_level_words(sql: &str) -> Result<Vec<(usize, &str)>> {
    let bytes = sql.as_bytes();
    let mut words = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' | b'[' => {
                let close = if b == b'[' { b']' } else { b };
                i += 1;
                loop {
                    if i >= bytes.len() {
                        return Err(TransferError::spec("unterminated quote in query"));
                    }
                    if bytes[i] == close {
                        // doubled quote is an escaped quote
                        if i + 1 < bytes.len() && bytes[i + 1] == close {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| TransferError::spec("unbalanced parenthesis in query"))?;
                i += 1;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if depth == 0 {
                    words.push((start, &sql[start..i]));
                }
            }
            _ => i += 1,
        }
    }

    if depth != 0 {
        return Err(TransferError::spec("unbalanced parenthesis in query"));
    }
    Ok(words)
}
