//! Element model
//!
//! The device exposes a tree of elements. Every element has a path and one of
//! three content kinds: a plain node (a directory), a parameter (a leaf value,
//! used for endpoint labels) or a matrix (a switching fabric with targets,
//! sources and their current connections).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result, TreePath};

/// Parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A tree element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub path: TreePath,
    pub contents: Contents,
}

/// Element contents by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Contents {
    Node(NodeContents),
    Parameter(ParameterContents),
    Matrix(MatrixContents),
}

/// Plain node contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parameter contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Matrix contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixContents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub target_count: u32,
    pub source_count: u32,
    /// Explicit target ids, when the device numbers them sparsely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<u32>>,
    /// Explicit source ids, when the device numbers them sparsely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<u32>>,
    /// Connections keyed by target id. Pushes carry only the changed targets.
    #[serde(default)]
    pub connections: BTreeMap<u32, Connection>,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
}

impl MatrixContents {
    pub fn new(identifier: impl Into<String>, target_count: u32, source_count: u32) -> Self {
        Self {
            identifier: Some(identifier.into()),
            target_count,
            source_count,
            ..Default::default()
        }
    }

    /// Target ids, falling back to `0..target_count`
    pub fn target_ids(&self) -> Vec<u32> {
        match &self.targets {
            Some(ids) => ids.clone(),
            None => (0..self.target_count).collect(),
        }
    }

    /// Source ids, falling back to `0..source_count`
    pub fn source_ids(&self) -> Vec<u32> {
        match &self.sources {
            Some(ids) => ids.clone(),
            None => (0..self.source_count).collect(),
        }
    }
}

/// A crosspoint connection on one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub target: u32,
    #[serde(default)]
    pub sources: Vec<u32>,
}

impl Connection {
    pub fn new(target: u32, sources: Vec<u32>) -> Self {
        Self { target, sources }
    }

    /// The connected source, if any. One-to-N matrices only report the first.
    pub fn primary_source(&self) -> Option<u32> {
        self.sources.first().copied()
    }
}

/// Reference to the label sub-tree of a matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRef {
    pub base_path: TreePath,
    #[serde(default)]
    pub description: String,
}

impl Element {
    pub fn node(path: TreePath, identifier: impl Into<String>) -> Self {
        Self {
            path,
            contents: Contents::Node(NodeContents {
                identifier: Some(identifier.into()),
                description: None,
            }),
        }
    }

    pub fn parameter(path: TreePath, identifier: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path,
            contents: Contents::Parameter(ParameterContents {
                identifier: Some(identifier.into()),
                value: value.into(),
            }),
        }
    }

    pub fn matrix(path: TreePath, contents: MatrixContents) -> Self {
        Self {
            path,
            contents: Contents::Matrix(contents),
        }
    }

    /// Identifier of the element, whatever its kind
    pub fn identifier(&self) -> Option<&str> {
        match &self.contents {
            Contents::Node(n) => n.identifier.as_deref(),
            Contents::Parameter(p) => p.identifier.as_deref(),
            Contents::Matrix(m) => m.identifier.as_deref(),
        }
    }

    /// Element number within its parent
    pub fn number(&self) -> Option<u32> {
        self.path.number()
    }

    pub fn as_matrix(&self) -> Option<&MatrixContents> {
        match &self.contents {
            Contents::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterContents> {
        match &self.contents {
            Contents::Parameter(p) => Some(p),
            _ => None,
        }
    }

    /// Matrix contents or an `UnexpectedElement` error
    pub fn expect_matrix(&self) -> Result<&MatrixContents> {
        self.as_matrix().ok_or_else(|| Error::UnexpectedElement {
            path: self.path.to_string(),
            expected: "matrix",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_ids_fall_back_to_counts() {
        let m = MatrixContents {
            target_count: 3,
            source_count: 2,
            ..Default::default()
        };
        assert_eq!(m.target_ids(), vec![0, 1, 2]);
        assert_eq!(m.source_ids(), vec![0, 1]);

        let sparse = MatrixContents {
            targets: Some(vec![4, 9]),
            ..m
        };
        assert_eq!(sparse.target_ids(), vec![4, 9]);
    }

    #[test]
    fn test_primary_source() {
        assert_eq!(Connection::new(0, vec![5, 6]).primary_source(), Some(5));
        assert_eq!(Connection::new(0, vec![]).primary_source(), None);
    }

    #[test]
    fn test_expect_matrix_on_node() {
        let node = Element::node(TreePath::parse("1.2").unwrap(), "routing");
        assert!(node.expect_matrix().is_err());
        assert_eq!(node.identifier(), Some("routing"));
    }
}
