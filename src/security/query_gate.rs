//! Read-only policy for model-generated SQL.
//!
//! This is the one place where untrusted, machine-written text is allowed
//! to reach the database, so the decision is a pure function of the query
//! text and the configured policy.  It never looks at the live schema and
//! never executes anything.
//!
//! Two modes:
//!
//! - **compatible**: trim, fold to uppercase, require a `SELECT` prefix,
//!   reject any deny-listed keyword appearing as a *substring*.  This keeps
//!   the historical accept/reject behaviour, including its false positives
//!   (`UpdatedAt` contains `UPDATE`) and its blind spots (statement chaining
//!   with a keyword that is not on the list, `SELECT ... INTO`).
//! - **strict**: lex the statement, skipping string literals, quoted
//!   identifiers and comments, then require `SELECT` as the first keyword,
//!   at most one trailing `;`, and no deny-listed keyword as a whole token.

use std::collections::HashSet;

use tracing::warn;

use crate::config::{GateMode, QueryGateConfig};

/// Keywords the historical policy refuses.
pub const BASE_DENY_LIST: &[&str] =
    &["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE"];

/// Additional keywords refused in strict mode.
pub const STRICT_EXTRA_DENY: &[&str] = &[
    "EXEC", "EXECUTE", "MERGE", "GRANT", "REVOKE", "CREATE", "REPLACE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "INTO", "REINDEX",
];

/// Outcome of a gate check.  A rejection is a normal value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPolicyDecision {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl QueryPolicyDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryGate {
    mode: GateMode,
    deny: Vec<String>,
}

impl QueryGate {
    pub fn new(mode: GateMode, extra_deny: &[String]) -> Self {
        let strict_extra: &[&str] = match mode {
            GateMode::Compatible => &[],
            GateMode::Strict => STRICT_EXTRA_DENY,
        };

        let mut seen = HashSet::new();
        let deny = BASE_DENY_LIST
            .iter()
            .chain(strict_extra)
            .map(|s| s.to_string())
            .chain(extra_deny.iter().map(|s| s.trim().to_uppercase()))
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(s.clone()))
            .collect();

        Self { mode, deny }
    }

    pub fn from_config(config: &QueryGateConfig) -> Self {
        Self::new(config.mode, &config.extra_deny)
    }

    pub fn compatible() -> Self {
        Self::new(GateMode::Compatible, &[])
    }

    pub fn strict() -> Self {
        Self::new(GateMode::Strict, &[])
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn deny_list(&self) -> &[String] {
        &self.deny
    }

    /// Decide whether `sql` may be executed.  The original text (not the
    /// folded copy) is what the caller executes on acceptance.
    pub fn evaluate(&self, sql: &str) -> QueryPolicyDecision {
        let decision = match self.mode {
            GateMode::Compatible => self.evaluate_compatible(sql),
            GateMode::Strict => self.evaluate_strict(sql),
        };
        if let Some(ref reason) = decision.reason {
            warn!(mode = ?self.mode, reason = %reason, sql = %sql, "query rejected by gate");
        }
        decision
    }

    fn evaluate_compatible(&self, sql: &str) -> QueryPolicyDecision {
        let folded = sql.trim().to_uppercase();
        if !folded.starts_with("SELECT") {
            return QueryPolicyDecision::reject("only SELECT statements are allowed");
        }
        if let Some(keyword) = self.deny.iter().find(|k| folded.contains(k.as_str())) {
            return QueryPolicyDecision::reject(format!(
                "query contains forbidden keyword {keyword}"
            ));
        }
        QueryPolicyDecision::accept()
    }

    fn evaluate_strict(&self, sql: &str) -> QueryPolicyDecision {
        let tokens = match lex(sql) {
            Ok(t) => t,
            Err(reason) => return QueryPolicyDecision::reject(reason),
        };

        match tokens.first() {
            Some(Token::Word(w)) if w == "SELECT" => {}
            Some(_) => return QueryPolicyDecision::reject("only SELECT statements are allowed"),
            None => return QueryPolicyDecision::reject("empty query"),
        }

        let semicolons = tokens.iter().filter(|t| **t == Token::Semicolon).count();
        let trailing = matches!(tokens.last(), Some(Token::Semicolon));
        if semicolons > 1 || (semicolons == 1 && !trailing) {
            return QueryPolicyDecision::reject("multiple statements are not allowed");
        }

        let keyword = tokens.iter().find_map(|t| match t {
            Token::Word(w) if self.deny.iter().any(|k| k == w) => Some(w),
            _ => None,
        });
        if let Some(keyword) = keyword {
            return QueryPolicyDecision::reject(format!(
                "query contains forbidden keyword {keyword}"
            ));
        }

        QueryPolicyDecision::accept()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Unquoted identifier or keyword, uppercased.
    Word(String),
    Semicolon,
    /// Literals, quoted identifiers, operators, punctuation.
    Other,
}

/// Split SQL into the tokens the strict gate cares about.  Comments vanish,
/// literals and quoted identifiers collapse to `Other`.
fn lex(sql: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    prev = next;
                }
                if !closed {
                    return Err("unterminated block comment".into());
                }
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == close {
                        // Doubled quote is an escaped quote inside the literal.
                        if close != ']' && chars.peek() == Some(&close) {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated quoted literal".into());
                }
                tokens.push(Token::Other);
            }
            ';' => tokens.push(Token::Semicolon),
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                word.extend(c.to_uppercase());
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '$' {
                        word.extend(next.to_uppercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ => tokens.push(Token::Other),
        }
    }

    Ok(tokens)
}
