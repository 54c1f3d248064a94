//! Hierarchical subject patterns with wildcard matching.
//!
//! Subjects are dot-separated token hierarchies (`orders.eu.created`).
//! A subscription pattern may use `*` to match exactly one token and a
//! trailing `>` to match one or more remaining tokens.
//!
//! Matching is a forward scan over tokens with early exit, no allocation.

use crate::error::{LongeronError, Result};

/// Single-token wildcard.
pub const WILDCARD_TOKEN: &str = "*";

/// Trailing multi-token wildcard.
pub const WILDCARD_TAIL: &str = ">";

/// Whether `subject` is valid for publishing: non-empty dot-separated
/// tokens, no whitespace, no wildcard tokens.
#[must_use]
pub fn valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject.split('.').all(|tok| {
            !tok.is_empty()
                && tok != WILDCARD_TOKEN
                && tok != WILDCARD_TAIL
                && !tok.contains(char::is_whitespace)
        })
}

/// A parsed subscription pattern.
///
/// Kept as the raw string plus a pre-computed literal flag; token
/// iteration happens on match so patterns stay allocation-free to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    literal: bool,
}

impl SubjectPattern {
    /// Parse and validate a subscription pattern.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for empty tokens, whitespace, or a `>`
    /// wildcard anywhere but the final position.
    pub fn parse(pattern: impl Into<String>) -> Result<Self> {
        let raw = pattern.into();
        if raw.is_empty() {
            return Err(LongeronError::protocol("empty subject pattern"));
        }

        let mut literal = true;
        let mut tokens = raw.split('.').peekable();
        while let Some(tok) = tokens.next() {
            if tok.is_empty() || tok.contains(char::is_whitespace) {
                return Err(LongeronError::protocol(format!(
                    "invalid token in subject pattern '{raw}'"
                )));
            }
            match tok {
                WILDCARD_TOKEN => literal = false,
                WILDCARD_TAIL => {
                    if tokens.peek().is_some() {
                        return Err(LongeronError::protocol(format!(
                            "'>' must be the final token in '{raw}'"
                        )));
                    }
                    literal = false;
                }
                _ => {}
            }
        }

        Ok(Self { raw, literal })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains no wildcards.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        self.literal
    }

    /// Match a concrete subject against this pattern.
    #[must_use]
    pub fn matches(&self, subject: &str) -> bool {
        if self.literal {
            return self.raw == subject;
        }

        let mut pattern = self.raw.split('.');
        let mut subject = subject.split('.');

        loop {
            match (pattern.next(), subject.next()) {
                (Some(WILDCARD_TAIL), Some(_)) => return true,
                (Some(WILDCARD_TOKEN), Some(_)) => {}
                (Some(p), Some(s)) if p == s => {}
                (Some(_), Some(_)) => return false,
                (None, None) => return true,
                // `>` requires at least one remaining token; a shorter or
                // longer subject fails here.
                (Some(_), None) | (None, Some(_)) => return false,
            }
        }
    }
}

impl std::fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
