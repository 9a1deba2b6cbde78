//! Paths from the state root to a value.
//!
//! A path is a sequence of map keys and sequence indices. Its canonical form
//! joins the segments with `.` (`"list.0"`, `"user.name"`); the root is the
//! empty string. Change sets and subscriptions compare paths by that form.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Separator used by the canonical form.
pub const SEPARATOR: char = '.';

/// One step of a [`Path`].
///
/// All-digit keys are always represented as [`Segment::Index`] so that a key
/// and an index with the same text compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The segment as a map key.
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(key) => key.clone(),
            Segment::Index(index) => index.to_string(),
        }
    }

    /// The segment as a sequence index, if it is numeric.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(index) => Some(*index),
            Segment::Key(_) => None,
        }
    }
}

impl From<&str> for Segment {
    fn from(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(index)
                if raw.bytes().all(|b| b.is_ascii_digit())
                    && (raw == "0" || !raw.starts_with('0')) =>
            {
                Segment::Index(index)
            }
            _ => Segment::Key(raw.to_string()),
        }
    }
}

impl From<String> for Segment {
    fn from(raw: String) -> Self {
        Segment::from(raw.as_str())
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Path from the state root to a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Path(SmallVec<[Segment; 4]>);

impl Path {
    /// The root path (canonical form `""`).
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Parse a canonical dot-joined path.
    pub fn parse(canonical: &str) -> Self {
        if canonical.is_empty() {
            return Self::root();
        }
        Self(canonical.split(SEPARATOR).map(Segment::from).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// A new path one segment deeper.
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut next = self.0.clone();
        next.push(segment.into());
        Self(next)
    }

    /// The containing path. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut parent = self.0.clone();
        parent.pop();
        Self(parent)
    }

    /// Split into the containing path and the final segment.
    pub fn split_last(&self) -> Option<(Path, &Segment)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.iter().cloned().collect()), last))
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.starts_with(&other.0)
    }

    /// Canonical dot-joined form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(canonical: &str) -> Self {
        Path::parse(canonical)
    }
}

impl From<String> for Path {
    fn from(canonical: String) -> Self {
        Path::parse(&canonical)
    }
}

impl From<&String> for Path {
    fn from(canonical: &String) -> Self {
        Path::parse(canonical)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.canonical()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
