//! Trellis Intermediate Representation (IR)
//!
//! Canonical representation of a linearized graph traversal: the ordered
//! block sequence a frontend compiles a structured query into, plus the
//! out-of-band per-location metadata the emitter consumes.
//! All types are deterministically serializable for caching and provenance.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

mod expr;
mod location;
mod value;

pub use expr::{BinOp, Expr};
pub use location::{Direction, QueryPath};
pub use value::Value;

/// One instruction in the linear traversal program.
///
/// A valid sequence is exactly one `QueryRoot`, then zero or more local
/// blocks, then at most one `GlobalOperationsStart`, then zero or more
/// global blocks. The emitter rejects any other shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block")]
pub enum Block {
    /// Declares the initial type, and thus the initial alias. Must be first.
    QueryRoot { start_type: String },
    /// Records the current alias as the representative of the current location.
    MarkLocation,
    /// Moves the walk across an edge to a fresh alias.
    Traverse {
        direction: Direction,
        edge_name: String,
        #[serde(default)]
        optional: bool,
    },
    /// Restores the walk's cursor to a previously marked location.
    Backtrack { location: QueryPath },
    /// Accumulates a predicate, AND-combined with all others at the end.
    Filter { predicate: Expr },
    /// Structural marker for the end of an optional scope. No emitter effect.
    EndOptional,
    /// Separates per-step blocks from whole-query blocks. At most once.
    GlobalOperationsStart,
    /// Maps output names to the expressions projected under them.
    ConstructResult { fields: BTreeMap<String, Expr> },
}

/// Resolved type and optional-scope nesting for one traversal location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub type_name: String,
    /// How many enclosing optional traversals contain this location.
    #[serde(default)]
    pub optional_depth: usize,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No metadata recorded for location {0}")]
    UnknownLocation(QueryPath),
}

/// Per-location metadata supplied by the IR-producing frontend.
///
/// Read-only input to the emission driver; never mutated during a walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    root: QueryPath,
    locations: BTreeMap<QueryPath, LocationInfo>,
}

impl QueryMetadata {
    pub fn new(root: QueryPath) -> Self {
        Self {
            root,
            locations: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &QueryPath {
        &self.root
    }

    pub fn record(&mut self, path: QueryPath, info: LocationInfo) {
        self.locations.insert(path, info);
    }

    pub fn info(&self, path: &QueryPath) -> Result<&LocationInfo, MetadataError> {
        self.locations
            .get(path)
            .ok_or_else(|| MetadataError::UnknownLocation(path.clone()))
    }
}

/// A complete IR query: the block sequence plus its location metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrQuery {
    pub blocks: Vec<Block>,
    pub metadata: QueryMetadata,
}

impl IrQuery {
    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("IR should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent_of_query() -> IrQuery {
        let child = QueryPath::root().extend("out_Animal_ParentOf");
        let mut metadata = QueryMetadata::new(QueryPath::root());
        metadata.record(
            QueryPath::root(),
            LocationInfo {
                type_name: "Animal".to_string(),
                optional_depth: 0,
            },
        );
        metadata.record(
            child.clone(),
            LocationInfo {
                type_name: "Animal".to_string(),
                optional_depth: 0,
            },
        );

        IrQuery {
            blocks: vec![
                Block::QueryRoot {
                    start_type: "Animal".to_string(),
                },
                Block::MarkLocation,
                Block::Traverse {
                    direction: Direction::Out,
                    edge_name: "Animal_ParentOf".to_string(),
                    optional: false,
                },
                Block::MarkLocation,
                Block::GlobalOperationsStart,
                Block::ConstructResult {
                    fields: BTreeMap::from([(
                        "parent_name".to_string(),
                        Expr::OutputField {
                            location: child,
                            field_name: "name".to_string(),
                        },
                    )]),
                },
            ],
            metadata,
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let query1 = parent_of_query();
        let query2 = query1.clone();

        assert_eq!(query1.fingerprint(), query2.fingerprint());
    }

    #[test]
    fn test_json_round_trip() {
        let query = parent_of_query();

        let json = serde_json::to_string(&query).unwrap();
        let parsed: IrQuery = serde_json::from_str(&json).unwrap();

        assert_eq!(query.fingerprint(), parsed.fingerprint());
    }

    #[test]
    fn test_metadata_lookup_fails_for_unrecorded_location() {
        let metadata = QueryMetadata::new(QueryPath::root());
        let missing = QueryPath::root().extend("out_Animal_ParentOf");

        assert!(metadata.info(&missing).is_err());
    }
}
