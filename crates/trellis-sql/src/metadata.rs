//! Schema/join metadata: maps traversal types to tables and edges to joins
//!
//! Supplied whole by external schema tooling and shared immutably across
//! compilations. Reversed edges and superclass edge inheritance are resolved
//! once when the metadata is built, never during a walk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use trellis_ir::Value;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Type '{0}' exists in the schema, but has no table in the SQL metadata")]
    UnknownType(String),

    #[error("Edge '{edge}' from type '{type_name}' exists in the schema, but not in the SQL metadata")]
    UnknownEdge { type_name: String, edge: String },

    #[error("Table for type '{0}' collides with an already registered type (lookups are case-insensitive)")]
    DuplicateTable(String),
}

/// Declared column type, checked against literal values at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Decimal,
    Text,
    Date,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

/// A physical table backing one schema type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Schema-qualified table name as rendered in a FROM clause.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

/// Physical join columns for one directioned edge: an equi-join on exactly
/// one column pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeJoin {
    pub to_type: String,
    pub from_column: String,
    pub to_column: String,
}

/// Subclass disambiguation for a polymorphic type: rows whose
/// `disambiguation_column` takes one of `allowed_values` belong to the
/// subclass. Consumed by the external coercion-lowering pass, not by the
/// emission driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionSpec {
    pub disambiguation_column: String,
    pub allowed_values: Vec<Value>,
}

/// Read-only metadata consulted by the emission driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlMetadata {
    /// Keyed by lowercased type name.
    tables: BTreeMap<String, Table>,
    /// Keyed by lowercased type name, then by directioned edge field.
    joins: BTreeMap<String, BTreeMap<String, EdgeJoin>>,
    /// Keyed by lowercased base type name, then by subclass name.
    coercions: BTreeMap<String, BTreeMap<String, CoercionSpec>>,
}

impl SqlMetadata {
    pub fn builder() -> SqlMetadataBuilder {
        SqlMetadataBuilder::new()
    }

    pub fn has_table(&self, type_name: &str) -> bool {
        self.tables.contains_key(&type_name.to_lowercase())
    }

    /// Resolve a schema type name to its table, case-insensitively.
    pub fn table(&self, type_name: &str) -> Result<&Table, SchemaError> {
        self.tables
            .get(&type_name.to_lowercase())
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))
    }

    /// Resolve the join specification for a directioned edge field
    /// (e.g. `out_Animal_ParentOf`) reachable from `type_name`.
    pub fn edge(&self, type_name: &str, edge_field: &str) -> Result<&EdgeJoin, SchemaError> {
        self.joins
            .get(&type_name.to_lowercase())
            .and_then(|edges| edges.get(edge_field))
            .ok_or_else(|| SchemaError::UnknownEdge {
                type_name: type_name.to_string(),
                edge: edge_field.to_string(),
            })
    }

    pub fn coercion(&self, base_type: &str, subclass: &str) -> Option<&CoercionSpec> {
        self.coercions
            .get(&base_type.to_lowercase())
            .and_then(|specs| specs.get(subclass))
    }
}

/// Builder that assembles `SqlMetadata` from declared tables and forward
/// edges, deriving reversed edges and inheriting superclass edges.
#[derive(Debug, Default)]
pub struct SqlMetadataBuilder {
    tables: Vec<(String, Table)>,
    edges: BTreeMap<String, BTreeMap<String, EdgeJoin>>,
    subclasses: BTreeMap<String, Vec<String>>,
    coercions: BTreeMap<String, BTreeMap<String, CoercionSpec>>,
}

impl SqlMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table backing `type_name`.
    pub fn add_table(&mut self, type_name: impl Into<String>, table: Table) -> &mut Self {
        self.tables.push((type_name.into(), table));
        self
    }

    /// Register a forward edge. Fields named `out_*` get a derived `in_*`
    /// reversal on the destination type at build time.
    pub fn add_edge(
        &mut self,
        origin_type: impl Into<String>,
        edge_field: impl Into<String>,
        join: EdgeJoin,
    ) -> &mut Self {
        self.edges
            .entry(origin_type.into())
            .or_default()
            .insert(edge_field.into(), join);
        self
    }

    /// Declare `base`'s subclasses; every edge of `base` is copied onto each
    /// subclass at build time.
    pub fn add_subclasses<I, S>(&mut self, base: impl Into<String>, subclasses: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subclasses
            .entry(base.into())
            .or_default()
            .extend(subclasses.into_iter().map(Into::into));
        self
    }

    pub fn add_coercion(
        &mut self,
        base: impl Into<String>,
        subclass: impl Into<String>,
        spec: CoercionSpec,
    ) -> &mut Self {
        self.coercions
            .entry(base.into())
            .or_default()
            .insert(subclass.into(), spec);
        self
    }

    pub fn build(&self) -> Result<SqlMetadata, SchemaError> {
        let mut tables = BTreeMap::new();
        for (type_name, table) in &self.tables {
            let key = type_name.to_lowercase();
            if tables.insert(key, table.clone()).is_some() {
                return Err(SchemaError::DuplicateTable(type_name.clone()));
            }
        }

        // Derive the reversed edge for every out_* forward edge.
        let mut reversed: BTreeMap<String, BTreeMap<String, EdgeJoin>> = BTreeMap::new();
        for (origin_type, edges) in &self.edges {
            for (edge_field, join) in edges {
                if let Some(suffix) = edge_field.strip_prefix("out_") {
                    reversed
                        .entry(join.to_type.clone())
                        .or_default()
                        .insert(
                            format!("in_{}", suffix),
                            EdgeJoin {
                                to_type: origin_type.clone(),
                                from_column: join.to_column.clone(),
                                to_column: join.from_column.clone(),
                            },
                        );
                }
            }
        }

        // Merge forward and reversed edges; reversed entries win collisions.
        let mut merged: BTreeMap<String, BTreeMap<String, EdgeJoin>> = self.edges.clone();
        for (type_name, edges) in reversed {
            merged.entry(type_name).or_default().extend(edges);
        }

        // Copy superclass edges onto every subclass.
        for (base, subclasses) in &self.subclasses {
            let base_edges = merged.get(base).cloned().unwrap_or_default();
            for subclass in subclasses {
                if subclass == base {
                    continue;
                }
                merged
                    .entry(subclass.clone())
                    .or_default()
                    .extend(base_edges.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        let joins = merged
            .into_iter()
            .map(|(type_name, edges)| (type_name.to_lowercase(), edges))
            .collect();

        let coercions = self
            .coercions
            .iter()
            .map(|(base, specs)| (base.to_lowercase(), specs.clone()))
            .collect();

        Ok(SqlMetadata {
            tables,
            joins,
            coercions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animal_table() -> Table {
        Table::new(
            "Animal",
            vec![
                Column::new("uuid", ColumnType::Text, false),
                Column::new("name", ColumnType::Text, false),
                Column::new("parent", ColumnType::Text, true),
            ],
        )
    }

    #[test]
    fn test_table_lookup_is_case_insensitive() {
        let mut builder = SqlMetadata::builder();
        builder.add_table("Animal", animal_table());
        let metadata = builder.build().unwrap();

        assert!(metadata.has_table("animal"));
        assert_eq!(metadata.table("ANIMAL").unwrap().name, "Animal");
        assert!(matches!(
            metadata.table("Species"),
            Err(SchemaError::UnknownType(_))
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut builder = SqlMetadata::builder();
        builder.add_table("Animal", animal_table());
        builder.add_table("animal", animal_table());

        assert!(matches!(
            builder.build(),
            Err(SchemaError::DuplicateTable(_))
        ));
    }

    #[test]
    fn test_reversed_edge_derived() {
        let mut builder = SqlMetadata::builder();
        builder.add_table("Animal", animal_table());
        builder.add_edge(
            "Animal",
            "out_Animal_ParentOf",
            EdgeJoin {
                to_type: "Animal".to_string(),
                from_column: "parent".to_string(),
                to_column: "uuid".to_string(),
            },
        );
        let metadata = builder.build().unwrap();

        let reversed = metadata.edge("Animal", "in_Animal_ParentOf").unwrap();
        assert_eq!(reversed.to_type, "Animal");
        assert_eq!(reversed.from_column, "uuid");
        assert_eq!(reversed.to_column, "parent");
    }

    #[test]
    fn test_subclass_inherits_base_edges() {
        let entity = Table::new(
            "Entity",
            vec![
                Column::new("uuid", ColumnType::Text, false),
                Column::new("related_entity", ColumnType::Text, true),
            ],
        );

        let mut builder = SqlMetadata::builder();
        builder.add_table("Entity", entity);
        builder.add_table("Animal", animal_table());
        builder.add_edge(
            "Entity",
            "out_Entity_Related",
            EdgeJoin {
                to_type: "Entity".to_string(),
                from_column: "related_entity".to_string(),
                to_column: "uuid".to_string(),
            },
        );
        builder.add_subclasses("Entity", ["Entity", "Animal"]);
        let metadata = builder.build().unwrap();

        // Both the forward edge and its reversal are inherited.
        assert!(metadata.edge("Animal", "out_Entity_Related").is_ok());
        assert!(metadata.edge("Animal", "in_Entity_Related").is_ok());
        assert!(matches!(
            metadata.edge("Animal", "out_Animal_ParentOf"),
            Err(SchemaError::UnknownEdge { .. })
        ));
    }

    #[test]
    fn test_coercion_spec_exposed() {
        let mut builder = SqlMetadata::builder();
        builder.add_table("Entity", Table::new("Entity", vec![]));
        builder.add_coercion(
            "Entity",
            "Animal",
            CoercionSpec {
                disambiguation_column: "__source_table_name".to_string(),
                allowed_values: vec![Value::String("Animal".to_string())],
            },
        );
        let metadata = builder.build().unwrap();

        let spec = metadata.coercion("entity", "Animal").unwrap();
        assert_eq!(spec.disambiguation_column, "__source_table_name");
        assert!(metadata.coercion("entity", "Species").is_none());
    }
}
