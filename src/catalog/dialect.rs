//! T-SQL to SQLite shim for the one construct models reach for constantly.
//!
//! `SELECT TOP n ...` becomes `SELECT ... LIMIT n`.  Anything else passes
//! through untouched.  The query gate always sees the original text; this
//! runs only on text that was already accepted.

use std::borrow::Cow;

pub fn rewrite_top_clause(sql: &str) -> Cow<'_, str> {
    let Some(rest) = strip_keyword(sql.trim(), "SELECT") else {
        return Cow::Borrowed(sql);
    };
    let Some(rest) = strip_keyword(rest, "TOP") else {
        return Cow::Borrowed(sql);
    };
    let Some((limit, rest)) = take_count(rest) else {
        return Cow::Borrowed(sql);
    };

    let scan = scan_body(rest);
    let body = rest[..scan.end].trim().trim_end_matches(';').trim_end();
    if body.is_empty() {
        return Cow::Borrowed(sql);
    }
    if scan.has_limit {
        return Cow::Owned(format!("SELECT {body}"));
    }
    Cow::Owned(format!("SELECT {body} LIMIT {limit}"))
}

struct BodyScan {
    /// A `LIMIT` keyword outside parentheses, literals and comments.
    has_limit: bool,
    /// Byte offset where a comment running to end of input starts.
    end: usize,
}

fn scan_body(body: &str) -> BodyScan {
    let bytes = body.as_bytes();
    let mut scan = BodyScan {
        has_limit: false,
        end: body.len(),
    };
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            q @ (b'\'' | b'"' | b'`') => i = skip_past(bytes, i + 1, q),
            b'[' => i = skip_past(bytes, i + 1, b']'),
            b'-' if bytes.get(i + 1) == Some(&b'-') => match body[i..].find('\n') {
                Some(n) => i += n + 1,
                None => {
                    scan.end = i;
                    break;
                }
            },
            b'/' if bytes.get(i + 1) == Some(&b'*') => match body[i + 2..].find("*/") {
                Some(n) => i += n + 4,
                None => {
                    scan.end = i;
                    break;
                }
            },
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if depth == 0 && body[start..i].eq_ignore_ascii_case("LIMIT") {
                    scan.has_limit = true;
                }
            }
            _ => i += 1,
        }
    }
    scan
}

/// Index just past the next `close` at or after `from`, or the end.
fn skip_past(bytes: &[u8], from: usize, close: u8) -> usize {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == close)
        .map_or(bytes.len(), |n| from + n + 1)
}

/// Strip a leading ASCII keyword (case-insensitive) that is followed by
/// whitespace or an opening parenthesis.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &s[keyword.len()..];
    match rest.chars().next() {
        Some(c) if c.is_whitespace() || c == '(' => Some(rest),
        _ => None,
    }
}

/// Parse `n` or `(n)` at the start of `s`.
fn take_count(s: &str) -> Option<(u64, &str)> {
    let s = s.trim_start();
    let (inner, parenthesized) = match s.strip_prefix('(') {
        Some(after) => (after.trim_start(), true),
        None => (s, false),
    };

    let digits_len = inner.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let count: u64 = inner[..digits_len].parse().ok()?;
    let mut rest = &inner[digits_len..];

    if parenthesized {
        rest = rest.trim_start().strip_prefix(')')?;
    } else if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((count, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_top_to_limit() {
        let out = rewrite_top_clause("SELECT TOP 10 * FROM Books ORDER BY Price ASC");
        assert_eq!(out, "SELECT * FROM Books ORDER BY Price ASC LIMIT 10");
    }

    #[test]
    fn rewrites_parenthesized_and_lowercase() {
        let out = rewrite_top_clause("  select top(3) Title from Books;  ");
        assert_eq!(out, "SELECT Title from Books LIMIT 3");
    }

    #[test]
    fn leaves_plain_select_alone() {
        let sql = "SELECT * FROM Books LIMIT 5";
        assert!(matches!(rewrite_top_clause(sql), Cow::Borrowed(_)));
    }

    #[test]
    fn leaves_column_named_top_alone() {
        let sql = "SELECT TopSeller FROM Books";
        assert!(matches!(rewrite_top_clause(sql), Cow::Borrowed(_)));
    }

    #[test]
    fn requires_a_count() {
        let sql = "SELECT TOP * FROM Books";
        assert!(matches!(rewrite_top_clause(sql), Cow::Borrowed(_)));
    }

    #[test]
    fn limit_goes_before_a_trailing_line_comment() {
        let out = rewrite_top_clause("SELECT TOP 5 * FROM Books ORDER BY Price -- cheapest first");
        assert_eq!(out, "SELECT * FROM Books ORDER BY Price LIMIT 5");

        let out = rewrite_top_clause("SELECT TOP 5 * FROM Books; -- done");
        assert_eq!(out, "SELECT * FROM Books LIMIT 5");
    }

    #[test]
    fn dashes_inside_a_literal_are_not_a_comment() {
        let out = rewrite_top_clause("SELECT TOP 1 * FROM Books WHERE Title = 'a -- b'");
        assert_eq!(out, "SELECT * FROM Books WHERE Title = 'a -- b' LIMIT 1");
    }

    #[test]
    fn existing_limit_wins_over_top() {
        let out = rewrite_top_clause("SELECT TOP 5 * FROM Books ORDER BY Price LIMIT 3");
        assert_eq!(out, "SELECT * FROM Books ORDER BY Price LIMIT 3");
    }

    #[test]
    fn limit_in_a_subquery_does_not_count() {
        let out = rewrite_top_clause(
            "SELECT TOP 2 * FROM Books WHERE BookID IN (SELECT BookID FROM Books LIMIT 4)",
        );
        assert_eq!(
            out,
            "SELECT * FROM Books WHERE BookID IN (SELECT BookID FROM Books LIMIT 4) LIMIT 2"
        );
        let out = rewrite_top_clause("SELECT TOP 2 \"Limit\" FROM Books");
        assert_eq!(out, "SELECT \"Limit\" FROM Books LIMIT 2");
    }
}
