//! Tree addressing and wildcard pattern matching.
//!
//! A [`Path`] names one location in a tree (`services.web.ports.[0]`) or,
//! with wildcards, a family of locations (`services.*.ports`). Paths are
//! immutable; extending one returns a new path.

use std::fmt;
use std::sync::Arc;

/// Wildcard matching any mapping key.
pub const MATCH_ANY_KEY: &str = "*";
/// Wildcard matching any sequence index.
pub const MATCH_ANY_INDEX: &str = "[]";

/// One component of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// A literal mapping key.
    Key(String),
    /// A literal sequence index.
    Index(usize),
    /// `*`: any key.
    AnyKey,
    /// `[]`: any index.
    AnyIndex,
}

impl Segment {
    /// Parse one dotted component.
    pub fn parse(raw: &str) -> Self {
        if raw == MATCH_ANY_KEY {
            return Segment::AnyKey;
        }
        if raw == MATCH_ANY_INDEX {
            return Segment::AnyIndex;
        }
        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']'))
            && let Ok(index) = inner.parse::<usize>()
        {
            return Segment::Index(index);
        }
        Segment::Key(raw.to_string())
    }

    /// Whether this (concrete) segment is accepted by a pattern segment.
    pub fn matched_by(&self, pattern: &Segment) -> bool {
        match (pattern, self) {
            (Segment::AnyKey, Segment::Key(_)) => true,
            (Segment::AnyIndex, Segment::Index(_)) => true,
            (p, s) => p == s,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::AnyKey | Segment::AnyIndex)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, "{}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
            Segment::AnyKey => write!(f, "{}", MATCH_ANY_KEY),
            Segment::AnyIndex => write!(f, "{}", MATCH_ANY_INDEX),
        }
    }
}

impl From<&str> for Segment {
    fn from(raw: &str) -> Self {
        Segment::Key(raw.to_string())
    }
}

impl From<String> for Segment {
    fn from(raw: String) -> Self {
        Segment::Key(raw)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// An immutable location in a tree.
///
/// Segments live behind an `Arc`, so cloning a path is cheap and extending
/// one never touches the original.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Path {
    segments: Arc<[Segment]>,
}

impl Path {
    /// The empty (root) path.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Parse a dotted path such as `services.*.ports` or `a.[0].b`.
    ///
    /// The empty string is the root path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::new();
        }
        Self::from_segments(dotted.split('.').map(Segment::parse))
    }

    /// Return a new path with `segment` appended.
    pub fn next(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment.into());
        Self::from_segments(segments)
    }

    pub fn key(&self, key: &str) -> Self {
        self.next(Segment::Key(key.to_string()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.next(Segment::Index(index))
    }

    /// The path without its last segment; the root is its own parent.
    pub fn parent(&self) -> Self {
        match self.segments.split_last() {
            Some((_, init)) => Self::from_segments(init.iter().cloned()),
            None => Self::new(),
        }
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Literal prefix test (no wildcard handling).
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Replace a leading `prefix` with `replacement`.
    ///
    /// Returns `None` when `self` does not start with `prefix`.
    pub fn rebase(&self, prefix: &Path, replacement: &Path) -> Option<Self> {
        let rest = self.segments.strip_prefix(&*prefix.segments)?;
        Some(Self::from_segments(
            replacement.segments.iter().chain(rest.iter()).cloned(),
        ))
    }

    /// Whether this concrete path is matched by `pattern`.
    ///
    /// Arity must be equal: there are no prefix matches.
    pub fn matches(&self, pattern: &Path) -> bool {
        self.segments.len() == pattern.segments.len()
            && self
                .segments
                .iter()
                .zip(pattern.segments.iter())
                .all(|(segment, pattern)| segment.matched_by(pattern))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}
