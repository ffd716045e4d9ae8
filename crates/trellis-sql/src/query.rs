//! Abstract relational query values produced by emission
//!
//! The plan is first-class data: a projection list, a join-graph root, and
//! a combined filter predicate, consumable by a query builder or rendered
//! to SQL text via [`crate::render::render_sql`].

use serde::{Deserialize, Serialize};
use trellis_ir::Value;

use crate::metadata::Table;

/// One occurrence of a table in the join graph, under a distinct alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasedTable {
    pub alias: String,
    pub table: Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// A column on a specific alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

/// One equi-join edge in the join graph: `left = right`, with `right`
/// living on the newly joined `table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub table: AliasedTable,
    pub left: ColumnRef,
    pub right: ColumnRef,
    pub kind: JoinKind,
}

/// The accumulated join graph: a root alias plus an append-only join list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromClause {
    pub root: AliasedTable,
    pub joins: Vec<Join>,
}

/// Binary operators that survive into the compiled plan.
///
/// `In` does not appear here: membership checks compile to [`SqlExpr::InList`],
/// and null comparisons compile to `IsNull`/`IsNotNull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Compiled relational expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SqlExpr {
    Literal {
        value: Value,
    },
    Column {
        column: ColumnRef,
    },
    Binary {
        op: SqlOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    IsNull {
        expr: Box<SqlExpr>,
    },
    IsNotNull {
        expr: Box<SqlExpr>,
    },
    InList {
        column: ColumnRef,
        values: Vec<Value>,
    },
    Case {
        predicate: Box<SqlExpr>,
        if_true: Box<SqlExpr>,
        if_false: Box<SqlExpr>,
    },
}

/// A projected expression under its requested output name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub expr: SqlExpr,
    pub label: String,
}

/// The complete compiled query: SELECT `outputs` FROM `from` WHERE
/// AND(`filters`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub outputs: Vec<OutputColumn>,
    pub from: FromClause,
    pub filters: Vec<SqlExpr>,
}
