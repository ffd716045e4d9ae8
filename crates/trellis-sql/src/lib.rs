//! Trellis SQL backend
//!
//! Compiles a linearized graph traversal (trellis-ir blocks plus
//! per-location metadata) into an abstract relational query: aliased
//! tables, a flat equi-join graph, an AND-combined filter predicate, and a
//! labeled projection list. A debug renderer turns the plan into SQL text.
//!
//! The pipeline is a deterministic fold: lowering rewrites
//! existence checks into null comparisons, then the emission driver walks
//! the block sequence, consulting the schema/join metadata.

use tracing::debug;
use trellis_ir::IrQuery;

pub mod emit;
pub mod lower;
pub mod metadata;
pub mod query;
pub mod render;

pub use emit::{emit_sql, CompileError};
pub use lower::lower_ir;
pub use metadata::{
    CoercionSpec, Column, ColumnType, EdgeJoin, SchemaError, SqlMetadata, SqlMetadataBuilder,
    Table,
};
pub use query::{
    AliasedTable, ColumnRef, FromClause, Join, JoinKind, OutputColumn, SelectQuery, SqlExpr, SqlOp,
};
pub use render::{render_sql, RenderError};

/// Lower and emit in one call.
pub fn compile(query: &IrQuery, sql_metadata: &SqlMetadata) -> Result<SelectQuery, CompileError> {
    debug!(blocks = query.blocks.len(), "compiling IR query");
    let lowered = lower::lower_ir(query.blocks.clone());
    emit::emit_sql(&lowered, &query.metadata, sql_metadata)
}
