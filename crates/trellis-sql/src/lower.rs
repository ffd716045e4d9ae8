//! Pre-emission IR-to-IR rewrites
//!
//! Keeps the emission driver's expression vocabulary small: branch-existence
//! checks are rewritten into null comparisons the expression compiler
//! already handles, so the driver never sees a `BranchExistence` node.

use trellis_ir::{BinOp, Block, Expr, Value};

/// Pseudo-field compared against NULL by the existence-check rewrite.
///
/// Never reaches a rendered query: the projection shortcut discards ternary
/// predicates, and any other route fails column resolution, which is the
/// intended signal for malformed frontend IR.
pub const EXISTENCE_PROBE_FIELD: &str = "@this";

/// Rewrite the block sequence ahead of emission. Pure and total; the block
/// order and count are unchanged.
pub fn lower_ir(blocks: Vec<Block>) -> Vec<Block> {
    blocks.into_iter().map(lower_block).collect()
}

fn lower_block(block: Block) -> Block {
    match block {
        Block::Filter { predicate } => Block::Filter {
            predicate: lower_expr(predicate),
        },
        Block::ConstructResult { fields } => Block::ConstructResult {
            fields: fields
                .into_iter()
                .map(|(name, field)| (name, lower_expr(field)))
                .collect(),
        },
        other => other,
    }
}

fn lower_expr(expr: Expr) -> Expr {
    match expr {
        Expr::BranchExistence { location } => Expr::Binary {
            op: BinOp::Ne,
            left: Box::new(Expr::OutputField {
                location,
                field_name: EXISTENCE_PROBE_FIELD.to_string(),
            }),
            right: Box::new(Expr::Literal { value: Value::Null }),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(lower_expr(*left)),
            right: Box::new(lower_expr(*right)),
        },
        Expr::Ternary {
            predicate,
            if_true,
            if_false,
        } => Expr::Ternary {
            predicate: Box::new(lower_expr(*predicate)),
            if_true: Box::new(lower_expr(*if_true)),
            if_false: Box::new(lower_expr(*if_false)),
        },
        other => other,
    }
}
