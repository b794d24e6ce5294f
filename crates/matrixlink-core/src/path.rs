//! Tree path parsing
//!
//! Elements on the device are addressed by dotted numeric paths:
//! ```text
//! 1            device root node
//! 1.2.0.3      video matrix
//! 1.2.0.4.1.7  label of video target 7
//! ```
//!
//! The empty path is the tree root above every top-level element.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A parsed tree path
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath {
    segments: Vec<u32>,
}

impl TreePath {
    /// The root path (no segments)
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::root());
        }

        let segments = s
            .split('.')
            .map(|seg| {
                if seg.is_empty() {
                    return Err(Error::InvalidPath(format!("empty segment in path: {}", s)));
                }
                seg.parse::<u32>()
                    .map_err(|_| Error::InvalidPath(format!("non-numeric segment '{}' in {}", seg, s)))
            })
            .collect::<Result<Vec<u32>>>()?;

        Ok(Self { segments })
    }

    /// Build a path from raw segments
    pub fn from_segments(segments: impl Into<Vec<u32>>) -> Self {
        Self {
            segments: segments.into(),
        }
    }

    /// Get the path segments
    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    /// Check whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of the element within its parent
    pub fn number(&self) -> Option<u32> {
        self.segments.last().copied()
    }

    /// Path of the parent element (the root has none)
    pub fn parent(&self) -> Option<TreePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Path of a direct child
    pub fn child(&self, number: u32) -> TreePath {
        let mut segments = self.segments.clone();
        segments.push(number);
        Self { segments }
    }

    /// Check whether `self` lies at or below `prefix`
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Check whether `self` is a direct child of `parent`
    pub fn is_child_of(&self, parent: &TreePath) -> bool {
        self.segments.len() == parent.segments.len() + 1 && self.starts_with(parent)
    }

    /// Depth below the root
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", seg)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TreePath::parse(s)
    }
}

impl TryFrom<&str> for TreePath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        TreePath::parse(s)
    }
}

impl TryFrom<String> for TreePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        TreePath::parse(&s)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.to_string()
    }
}
