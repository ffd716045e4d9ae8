//! Emission driver: folds lowered IR blocks into a relational query
//!
//! A stateful walk over the block sequence. Traversals append equi-joins to
//! a flat join list under fresh aliases; marks record the alias for a
//! location; backtracks move only the walk's cursor. Filters and outputs
//! are compiled against the alias registry as they are encountered.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};
use trellis_ir::{BinOp, Block, Expr, QueryMetadata, QueryPath, Value};

use crate::metadata::{SchemaError, SqlMetadata, Table};
use crate::query::{
    AliasedTable, ColumnRef, FromClause, Join, JoinKind, OutputColumn, SelectQuery, SqlExpr, SqlOp,
};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Query must begin with a QueryRoot block")]
    MissingQueryRoot,

    #[error("Duplicate QueryRoot block")]
    DuplicateQueryRoot,

    #[error("Duplicate GlobalOperationsStart block")]
    DuplicateGlobalStart,

    #[error("Block {block} may not appear in the global operations section")]
    MisplacedBlock { block: &'static str },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Metadata(#[from] trellis_ir::MetadataError),

    #[error("Location {0} was referenced but never marked")]
    UnmarkedLocation(QueryPath),

    #[error("Field '{field}' does not exist on table '{table}'")]
    UnknownColumn { table: String, field: String },

    #[error("Unsupported block in the traversal section: {0}")]
    UnsupportedBlock(&'static str),

    #[error("Unsupported projection for output '{output}': {reason}")]
    UnsupportedProjection { output: String, reason: String },

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

/// Emit a relational query from a lowered block sequence.
///
/// `query_metadata` supplies the root location and each location's resolved
/// type and optional-scope depth; `sql_metadata` supplies tables and joins.
pub fn emit_sql(
    blocks: &[Block],
    query_metadata: &QueryMetadata,
    sql_metadata: &SqlMetadata,
) -> Result<SelectQuery, CompileError> {
    let (start_type, local_blocks, global_blocks) = split_blocks(blocks)?;
    debug!(
        start_type,
        local = local_blocks.len(),
        global = global_blocks.len(),
        "emitting relational query"
    );

    let root_table = sql_metadata.table(start_type)?;
    let mut walk = Walk::new(
        query_metadata.root().clone(),
        start_type.to_string(),
        root_table,
    );

    for block in local_blocks {
        walk.apply_local(block, query_metadata, sql_metadata)?;
    }

    // The local walk is over; outputs have no per-step position.
    let mut outputs = Vec::new();
    for block in global_blocks {
        match block {
            Block::GlobalOperationsStart => {}
            Block::ConstructResult { fields } => {
                for (output_name, field) in fields {
                    outputs.push(walk.compile_output(output_name, field)?);
                }
            }
            other => {
                return Err(CompileError::MisplacedBlock {
                    block: block_name(other),
                })
            }
        }
    }

    Ok(SelectQuery {
        outputs,
        from: walk.from_clause,
        filters: walk.filters,
    })
}

/// Validate the block-ordering invariant and partition the sequence into the
/// start type, the traversal ("local") section, and the global section.
/// The `GlobalOperationsStart` marker itself stays in the global section.
fn split_blocks(blocks: &[Block]) -> Result<(&str, Vec<&Block>, Vec<&Block>), CompileError> {
    let Some((first, rest)) = blocks.split_first() else {
        return Err(CompileError::MissingQueryRoot);
    };
    let Block::QueryRoot { start_type } = first else {
        return Err(CompileError::MissingQueryRoot);
    };

    let mut local_blocks = Vec::new();
    let mut global_blocks = Vec::new();
    let mut found_global_start = false;
    for block in rest {
        match block {
            Block::QueryRoot { .. } => return Err(CompileError::DuplicateQueryRoot),
            Block::GlobalOperationsStart => {
                if found_global_start {
                    return Err(CompileError::DuplicateGlobalStart);
                }
                found_global_start = true;
            }
            _ => {}
        }
        if found_global_start {
            global_blocks.push(block);
        } else {
            local_blocks.push(block);
        }
    }

    Ok((start_type, local_blocks, global_blocks))
}

fn block_name(block: &Block) -> &'static str {
    match block {
        Block::QueryRoot { .. } => "QueryRoot",
        Block::MarkLocation => "MarkLocation",
        Block::Traverse { .. } => "Traverse",
        Block::Backtrack { .. } => "Backtrack",
        Block::Filter { .. } => "Filter",
        Block::EndOptional => "EndOptional",
        Block::GlobalOperationsStart => "GlobalOperationsStart",
        Block::ConstructResult { .. } => "ConstructResult",
    }
}

/// Mutable walk state, exclusively owned for the duration of one compilation.
struct Walk {
    current_path: QueryPath,
    current_type: String,
    current_alias: AliasedTable,
    /// Updated only at MarkLocation blocks.
    aliases: HashMap<QueryPath, AliasedTable>,
    from_clause: FromClause,
    filters: Vec<SqlExpr>,
    alias_counter: usize,
}

impl Walk {
    fn new(root_path: QueryPath, start_type: String, root_table: &Table) -> Self {
        let root_alias = AliasedTable {
            alias: "alias_1".to_string(),
            table: root_table.clone(),
        };
        Self {
            current_path: root_path,
            current_type: start_type,
            current_alias: root_alias.clone(),
            aliases: HashMap::new(),
            from_clause: FromClause {
                root: root_alias,
                joins: Vec::new(),
            },
            filters: Vec::new(),
            alias_counter: 1,
        }
    }

    fn fresh_alias(&mut self, table: &Table) -> AliasedTable {
        self.alias_counter += 1;
        AliasedTable {
            alias: format!("alias_{}", self.alias_counter),
            table: table.clone(),
        }
    }

    fn apply_local(
        &mut self,
        block: &Block,
        query_metadata: &QueryMetadata,
        sql_metadata: &SqlMetadata,
    ) -> Result<(), CompileError> {
        match block {
            Block::EndOptional => {}
            Block::MarkLocation => {
                trace!(location = %self.current_path, alias = %self.current_alias.alias, "mark");
                self.aliases
                    .insert(self.current_path.clone(), self.current_alias.clone());
            }
            Block::Backtrack { location } => {
                let alias = self
                    .aliases
                    .get(location)
                    .ok_or_else(|| CompileError::UnmarkedLocation(location.clone()))?
                    .clone();
                trace!(location = %location, alias = %alias.alias, "backtrack");
                // Cursor-only restore; joins already emitted stay in place.
                // The type comes from the query metadata, not the join graph.
                self.current_type = query_metadata.info(location)?.type_name.clone();
                self.current_path = location.clone();
                self.current_alias = alias;
            }
            Block::Traverse {
                direction,
                edge_name,
                optional,
            } => {
                let edge_field = format!("{}_{}", direction, edge_name);
                let edge = sql_metadata.edge(&self.current_type, &edge_field)?;
                let to_table = sql_metadata.table(&edge.to_type)?;

                let previous_alias = self.current_alias.clone();
                check_column(&previous_alias.table, &edge.from_column)?;
                check_column(to_table, &edge.to_column)?;

                let next_alias = self.fresh_alias(to_table);
                trace!(
                    edge = %edge_field,
                    from = %previous_alias.alias,
                    to = %next_alias.alias,
                    optional,
                    "traverse"
                );
                self.from_clause.joins.push(Join {
                    table: next_alias.clone(),
                    left: ColumnRef {
                        alias: previous_alias.alias,
                        column: edge.from_column.clone(),
                    },
                    right: ColumnRef {
                        alias: next_alias.alias.clone(),
                        column: edge.to_column.clone(),
                    },
                    kind: if *optional {
                        JoinKind::LeftOuter
                    } else {
                        JoinKind::Inner
                    },
                });

                self.current_path = self.current_path.extend(edge_field);
                self.current_type = edge.to_type.clone();
                self.current_alias = next_alias;
            }
            Block::Filter { predicate } => {
                let mut compiled = self.compile_expr(predicate)?;

                // A take-no-match optional branch yields NULL columns that
                // would otherwise fail the filter and drop the root row, so
                // predicates inside optional scopes pass on NULL local
                // fields as well. Known approximation: predicates combining
                // several optional branches are not handled.
                let depth = query_metadata.info(&self.current_path)?.optional_depth;
                if depth > 0 {
                    for field_name in local_fields_used(predicate) {
                        let column = self.resolve_local_field(field_name)?;
                        compiled = SqlExpr::Binary {
                            op: SqlOp::Or,
                            left: Box::new(compiled),
                            right: Box::new(SqlExpr::IsNull {
                                expr: Box::new(SqlExpr::Column { column }),
                            }),
                        };
                    }
                }

                self.filters.push(compiled);
            }
            other => return Err(CompileError::UnsupportedBlock(block_name(other))),
        }
        Ok(())
    }

    /// Compile one named output of a `ConstructResult` block.
    ///
    /// A ternary conditional projects its `if_true` branch; the predicate
    /// and `if_false` side are discarded, since the outer join already
    /// supplies NULL when the optional branch was not taken. The projected
    /// field must be an output-field reference.
    fn compile_output(&self, output_name: &str, field: &Expr) -> Result<OutputColumn, CompileError> {
        let field = match field {
            Expr::Ternary { if_true, .. } => if_true.as_ref(),
            other => other,
        };

        match field {
            Expr::OutputField {
                location,
                field_name,
            } => {
                let column = self.resolve_output_field(location, field_name)?;
                Ok(OutputColumn {
                    expr: SqlExpr::Column { column },
                    label: output_name.to_string(),
                })
            }
            other => Err(CompileError::UnsupportedProjection {
                output: output_name.to_string(),
                reason: format!("expected an output field reference, got {:?}", other),
            }),
        }
    }

    /// Translate one expression node into a relational expression, resolving
    /// field references through the alias registry and the current alias.
    fn compile_expr(&self, expr: &Expr) -> Result<SqlExpr, CompileError> {
        match expr {
            Expr::Literal { value } => Ok(SqlExpr::Literal {
                value: value.clone(),
            }),
            Expr::LocalField { field_name } => {
                let column = self.resolve_local_field(field_name)?;
                Ok(SqlExpr::Column { column })
            }
            Expr::OutputField {
                location,
                field_name,
            } => {
                let column = self.resolve_output_field(location, field_name)?;
                Ok(SqlExpr::Column { column })
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right),
            Expr::Ternary {
                predicate,
                if_true,
                if_false,
            } => Ok(SqlExpr::Case {
                predicate: Box::new(self.compile_expr(predicate)?),
                if_true: Box::new(self.compile_expr(if_true)?),
                if_false: Box::new(self.compile_expr(if_false)?),
            }),
            Expr::BranchExistence { location } => Err(CompileError::Internal(format!(
                "existence check for {} survived lowering",
                location
            ))),
        }
    }

    fn compile_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> Result<SqlExpr, CompileError> {
        // Null comparisons become IS [NOT] NULL on the other side.
        if matches!(op, BinOp::Eq | BinOp::Ne) {
            let null_operand = match (left, right) {
                (other, Expr::Literal { value: Value::Null }) => Some(other),
                (Expr::Literal { value: Value::Null }, other) => Some(other),
                _ => None,
            };
            if let Some(operand) = null_operand {
                let compiled = Box::new(self.compile_expr(operand)?);
                return Ok(match op {
                    BinOp::Eq => SqlExpr::IsNull { expr: compiled },
                    _ => SqlExpr::IsNotNull { expr: compiled },
                });
            }
        }

        if op == BinOp::In {
            let Expr::Literal {
                value: Value::List(values),
            } = right
            else {
                return Err(CompileError::UnsupportedExpression(
                    "IN requires a list literal on the right-hand side".to_string(),
                ));
            };
            let SqlExpr::Column { column } = self.compile_expr(left)? else {
                return Err(CompileError::UnsupportedExpression(
                    "IN requires a field reference on the left-hand side".to_string(),
                ));
            };
            return Ok(SqlExpr::InList {
                column,
                values: values.clone(),
            });
        }

        let sql_op = match op {
            BinOp::Eq => SqlOp::Eq,
            BinOp::Ne => SqlOp::Ne,
            BinOp::Lt => SqlOp::Lt,
            BinOp::Le => SqlOp::Le,
            BinOp::Gt => SqlOp::Gt,
            BinOp::Ge => SqlOp::Ge,
            BinOp::And => SqlOp::And,
            BinOp::Or => SqlOp::Or,
            BinOp::In => {
                return Err(CompileError::Internal(
                    "IN fell through its dedicated case".to_string(),
                ))
            }
        };
        Ok(SqlExpr::Binary {
            op: sql_op,
            left: Box::new(self.compile_expr(left)?),
            right: Box::new(self.compile_expr(right)?),
        })
    }

    fn resolve_local_field(&self, field_name: &str) -> Result<ColumnRef, CompileError> {
        check_column(&self.current_alias.table, field_name)?;
        Ok(ColumnRef {
            alias: self.current_alias.alias.clone(),
            column: field_name.to_string(),
        })
    }

    fn resolve_output_field(
        &self,
        location: &QueryPath,
        field_name: &str,
    ) -> Result<ColumnRef, CompileError> {
        let alias = self
            .aliases
            .get(location)
            .ok_or_else(|| CompileError::UnmarkedLocation(location.clone()))?;
        check_column(&alias.table, field_name)?;
        Ok(ColumnRef {
            alias: alias.alias.clone(),
            column: field_name.to_string(),
        })
    }
}

fn check_column(table: &Table, field_name: &str) -> Result<(), CompileError> {
    if table.column(field_name).is_none() {
        return Err(CompileError::UnknownColumn {
            table: table.name.clone(),
            field: field_name.to_string(),
        });
    }
    Ok(())
}

/// Local fields directly used by a predicate, for the optional-scope filter
/// rewrite. Recurses through binary compositions only; fields under
/// ternaries or behind output references are not collected.
fn local_fields_used(expr: &Expr) -> Vec<&str> {
    match expr {
        Expr::Binary { left, right, .. } => {
            let mut fields = local_fields_used(left);
            fields.extend(local_fields_used(right));
            fields
        }
        Expr::LocalField { field_name } => vec![field_name.as_str()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_blocks_requires_query_root() {
        let blocks = vec![Block::MarkLocation];
        assert!(matches!(
            split_blocks(&blocks),
            Err(CompileError::MissingQueryRoot)
        ));
        assert!(matches!(
            split_blocks(&[]),
            Err(CompileError::MissingQueryRoot)
        ));
    }

    #[test]
    fn test_split_blocks_rejects_second_root() {
        let blocks = vec![
            Block::QueryRoot {
                start_type: "Animal".to_string(),
            },
            Block::QueryRoot {
                start_type: "Species".to_string(),
            },
        ];
        assert!(matches!(
            split_blocks(&blocks),
            Err(CompileError::DuplicateQueryRoot)
        ));
    }

    #[test]
    fn test_split_blocks_rejects_duplicate_global_start() {
        let blocks = vec![
            Block::QueryRoot {
                start_type: "Animal".to_string(),
            },
            Block::GlobalOperationsStart,
            Block::GlobalOperationsStart,
        ];
        assert!(matches!(
            split_blocks(&blocks),
            Err(CompileError::DuplicateGlobalStart)
        ));
    }

    #[test]
    fn test_split_blocks_partitions_sections() {
        let blocks = vec![
            Block::QueryRoot {
                start_type: "Animal".to_string(),
            },
            Block::MarkLocation,
            Block::GlobalOperationsStart,
            Block::ConstructResult {
                fields: Default::default(),
            },
        ];

        let (start_type, local_blocks, global_blocks) = split_blocks(&blocks).unwrap();
        assert_eq!(start_type, "Animal");
        assert_eq!(local_blocks, vec![&Block::MarkLocation]);
        // The marker itself lands in the global section and is skipped there.
        assert_eq!(global_blocks.len(), 2);
        assert_eq!(global_blocks[0], &Block::GlobalOperationsStart);
    }

    #[test]
    fn test_local_fields_used_is_shallow() {
        let predicate = Expr::binary(
            BinOp::And,
            Expr::binary(
                BinOp::Gt,
                Expr::LocalField {
                    field_name: "net_worth".to_string(),
                },
                Expr::literal(Value::Int(100)),
            ),
            Expr::Ternary {
                predicate: Box::new(Expr::literal(Value::Bool(true))),
                if_true: Box::new(Expr::LocalField {
                    field_name: "name".to_string(),
                }),
                if_false: Box::new(Expr::literal(Value::Null)),
            },
        );

        // Fields under the ternary are deliberately not collected.
        assert_eq!(local_fields_used(&predicate), vec!["net_worth"]);
    }
}
