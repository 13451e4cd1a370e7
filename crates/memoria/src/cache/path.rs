//! Paths into computed values
//!
//! A [`ValuePath`] addresses a location inside a cached value, written as
//! `$.token.expiration` or `$.clients[0]`. The leading `$` is optional for
//! exit stack paths. A [`ResourcePath`] additionally carries the
//! `:ignore_missing` suffix, which turns a missing target into a no-op.

use std::fmt;
use std::str::FromStr;

use crate::error::{MemoError, MemoResult};

const IGNORE_MISSING_SUFFIX: &str = ":ignore_missing";

/// One step of a [`ValuePath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Named field or map key
    Field(String),
    /// Sequence position
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, ".{name}"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Parsed path into a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ValuePath {
    segments: Vec<PathSegment>,
}

impl ValuePath {
    /// The path addressing the whole value
    #[must_use]
    pub const fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse `$.a.b[0]`, `a.b[0]` or `$`
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::PathResolution`] for malformed paths.
    pub fn parse(raw: &str) -> MemoResult<Self> {
        let text = raw.trim();
        let body = text.strip_prefix('$').unwrap_or(text);
        let mut segments = Vec::new();
        let mut rest = body;

        // Without a leading "$" the first field has no dot.
        if !text.starts_with('$') && !rest.is_empty() && !rest.starts_with('[') {
            rest = take_field(text, rest, &mut segments)?;
        }

        while !rest.is_empty() {
            if let Some(after_dot) = rest.strip_prefix('.') {
                rest = take_field(text, after_dot, &mut segments)?;
            } else if let Some(after_bracket) = rest.strip_prefix('[') {
                let close = after_bracket
                    .find(']')
                    .ok_or_else(|| MemoError::path(text, "unterminated index"))?;
                let index = after_bracket[..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| MemoError::path(text, "index must be a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                rest = &after_bracket[close + 1..];
            } else {
                return Err(MemoError::path(text, "expected '.' or '[' between segments"));
            }
        }

        Ok(Self { segments })
    }

    /// Path segments from the root outwards
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether this path addresses the whole value
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

fn take_field<'a>(
    text: &str,
    input: &'a str,
    segments: &mut Vec<PathSegment>,
) -> MemoResult<&'a str> {
    let end = input.find(['.', '[']).unwrap_or(input.len());
    let name = &input[..end];
    if name.is_empty() {
        return Err(MemoError::path(text, "empty field name"));
    }
    segments.push(PathSegment::Field(name.to_string()));
    Ok(&input[end..])
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ValuePath {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A [`ValuePath`] plus the missing-target policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourcePath {
    path: ValuePath,
    ignore_missing: bool,
}

impl ResourcePath {
    /// Build from an already parsed path
    #[must_use]
    pub const fn new(path: ValuePath, ignore_missing: bool) -> Self {
        Self { path, ignore_missing }
    }

    /// Parse a path with an optional `:ignore_missing` suffix
    ///
    /// # Examples
    ///
    /// ```
    /// use memoria::ResourcePath;
    ///
    /// let path = ResourcePath::parse("$.clients[1]:ignore_missing").unwrap();
    /// assert!(path.ignore_missing());
    /// assert_eq!(path.path().to_string(), "$.clients[1]");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`MemoError::PathResolution`] for malformed paths.
    pub fn parse(raw: &str) -> MemoResult<Self> {
        let text = raw.trim();
        let (path, ignore_missing) =
            text.strip_suffix(IGNORE_MISSING_SUFFIX).map_or((text, false), |path| (path, true));
        Ok(Self::new(ValuePath::parse(path)?, ignore_missing))
    }

    /// The underlying value path
    #[must_use]
    pub const fn path(&self) -> &ValuePath {
        &self.path
    }

    /// Whether a missing target should be skipped rather than reported
    #[must_use]
    pub const fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ignore_missing {
            write!(f, "{}{IGNORE_MISSING_SUFFIX}", self.path)
        } else {
            write!(f, "{}", self.path)
        }
    }
}

impl FromStr for ResourcePath {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
