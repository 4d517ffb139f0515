use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Separator joining segments in the canonical key form.
pub const SEPARATOR: char = '/';

/// Hierarchical key addressing a single record.
///
/// A `StorageKey` is an ordered, non-empty list of segments. Two keys are
/// equal iff their segment lists are equal. The canonical form joins the
/// segments with [`SEPARATOR`]; it is what the lock table and the backing
/// medium see.
///
/// Keys order by their canonical string, not segment-by-segment. The
/// transaction coordinator relies on this: every transaction sorts its
/// keys the same way before taking locks.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StorageKey {
    segments: Vec<String>,
    canonical: String,
}

impl StorageKey {
    /// Build a key from its segments.
    ///
    /// Segments must be non-empty and must not contain [`SEPARATOR`].
    /// Escaping or otherwise sanitizing user input is the caller's job.
    pub fn new<I, S>(segments: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(TypeError::EmptyKey);
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(TypeError::InvalidSegment {
                    segment: segment.clone(),
                    reason: "segment is empty",
                });
            }
            if segment.contains(SEPARATOR) {
                return Err(TypeError::InvalidSegment {
                    segment: segment.clone(),
                    reason: "segment contains the path separator",
                });
            }
        }
        let canonical = segments.join(SEPARATOR.to_string().as_str());
        Ok(Self {
            segments,
            canonical,
        })
    }

    /// Parse a canonical `a/b/c` string back into a key.
    pub fn parse(canonical: &str) -> Result<Self, TypeError> {
        Self::new(canonical.split(SEPARATOR))
    }

    /// The canonical string used for locking and medium addressing.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The individual segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always at least one).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The final segment, e.g. the record id in `session/proj-1/sess-9`.
    pub fn leaf(&self) -> &str {
        // `new` guarantees at least one segment.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// A new key with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, TypeError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }
}

impl PartialEq for StorageKey {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for StorageKey {}

impl Hash for StorageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl PartialOrd for StorageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.canonical)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for StorageKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<Vec<String>> for StorageKey {
    type Error = TypeError;

    fn try_from(segments: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl TryFrom<&[&str]> for StorageKey {
    type Error = TypeError;

    fn try_from(segments: &[&str]) -> Result<Self, Self::Error> {
        Self::new(segments.iter().copied())
    }
}

impl<const N: usize> TryFrom<[&str; N]> for StorageKey {
    type Error = TypeError;

    fn try_from(segments: [&str; N]) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<StorageKey> for Vec<String> {
    fn from(key: StorageKey) -> Self {
        key.segments
    }
}
