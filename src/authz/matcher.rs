//! REST-style resource pattern matching.
//!
//! A pattern such as `/products/{productId}/stocks/*` is tokenized once into
//! typed segments. Matching a concrete request path is then a single
//! left-to-right pass with no backtracking: segment counts must agree and
//! every segment must satisfy its kind.
//!
//! - literal segments compare by exact string equality;
//! - `*` accepts any one non-empty segment;
//! - `{name}` accepts digits only when `name` ends in `ID` (or the camelCase
//!   `Id`, as in `{productId}`), otherwise `[A-Za-z0-9_.-]+`.
use std::fmt;

use crate::authz::errors::AuthzError;
use crate::authz::types::reject_reserved;

/// Parameter names with one of these suffixes only accept numeric segments.
const NUMERIC_PARAM_SUFFIXES: [&str; 2] = ["ID", "Id"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Wildcard,
    NumericParam(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            return Segment::Wildcard;
        }
        match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if NUMERIC_PARAM_SUFFIXES.iter().any(|s| name.ends_with(s)) => {
                Segment::NumericParam(name.to_string())
            }
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(raw.to_string()),
        }
    }

    fn accepts(&self, value: &str) -> bool {
        match self {
            Segment::Literal(lit) => lit == value,
            Segment::Wildcard => !value.is_empty(),
            Segment::NumericParam(_) => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            Segment::Param(_) => {
                !value.is_empty()
                    && value
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(lit) => f.write_str(lit),
            Segment::Wildcard => f.write_str("*"),
            Segment::NumericParam(name) | Segment::Param(name) => write!(f, "{{{name}}}"),
        }
    }
}

/// Parsed resource pattern. Always holds at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePattern {
    segments: Vec<Segment>,
}

impl ResourcePattern {
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthzError::InvalidPolicy(
                "resource pattern must not be empty".into(),
            ));
        }
        reject_reserved("pattern", raw)?;
        let segments = split_segments(raw).map(Segment::parse).collect();
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when `path` has exactly as many segments as the pattern and
    /// each one is accepted by the segment at the same position.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = split_segments(path);
        for segment in &self.segments {
            match parts.next() {
                Some(part) if segment.accepts(part) => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn split_segments(s: &str) -> std::str::Split<'_, char> {
    s.trim_matches('/').split('/')
}

/// Matches a request path against a raw pattern string. Malformed patterns
/// never match.
pub fn key_match(path: &str, pattern: &str) -> bool {
    ResourcePattern::parse(pattern)
        .map(|p| p.matches(path))
        .unwrap_or(false)
}
