//! Query-path model: identifies a point in the logical traversal tree

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an edge traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
        }
    }
}

/// Ordered sequence of direction-qualified edge steps from the query root.
///
/// Two paths are equal iff their step sequences are equal; this is the sole
/// key used for alias lookups during emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryPath(Vec<String>);

impl QueryPath {
    /// The path of the traversal root.
    pub fn root() -> Self {
        QueryPath(Vec::new())
    }

    /// Return this path extended by one traversal step.
    pub fn extend(&self, step: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(step.into());
        QueryPath(steps)
    }

    pub fn steps(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "root")
        } else {
            write!(f, "root.{}", self.0.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_is_pure() {
        let root = QueryPath::root();
        let child = root.extend("out_Animal_ParentOf");

        assert!(root.is_root());
        assert_eq!(child.steps(), ["out_Animal_ParentOf"]);
        assert_ne!(root, child);
    }

    #[test]
    fn test_equality_is_structural() {
        let a = QueryPath::root().extend("out_Animal_ParentOf").extend("in_Animal_OfSpecies");
        let b = QueryPath::root().extend("out_Animal_ParentOf").extend("in_Animal_OfSpecies");

        assert_eq!(a, b);
    }

    #[test]
    fn test_display() {
        let path = QueryPath::root().extend("out_Animal_ParentOf");
        assert_eq!(path.to_string(), "root.out_Animal_ParentOf");
        assert_eq!(QueryPath::root().to_string(), "root");
    }
}
