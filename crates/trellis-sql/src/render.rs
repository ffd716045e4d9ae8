//! SQL text rendering with inlined literal values
//!
//! Renders a compiled plan to SQL text with values filled in, for debugging
//! purposes *only*; production executions should bind parameters separately.
//! Literal values are checked against the declared type of the column they
//! are compared with, and nested lists are rejected rather than truncated.

use std::collections::HashMap;

use thiserror::Error;
use trellis_ir::Value;

use crate::metadata::ColumnType;
use crate::query::{ColumnRef, FromClause, JoinKind, SelectQuery, SqlExpr, SqlOp};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Value for column '{column}' is a nested list; no nested lists allowed")]
    NestedList { column: String },

    #[error("Value of kind '{kind}' for column '{column}' does not match its declared type {expected:?}")]
    TypeMismatch {
        column: String,
        kind: &'static str,
        expected: ColumnType,
    },
}

/// Render a compiled query as SQL text.
pub fn render_sql(query: &SelectQuery) -> Result<String, RenderError> {
    let types = declared_types(&query.from);

    let mut sql = String::from("SELECT ");
    if query.outputs.is_empty() {
        sql.push('*');
    } else {
        let outputs = query
            .outputs
            .iter()
            .map(|output| {
                render_expr(&output.expr, &types)
                    .map(|rendered| format!("{} AS {}", rendered, output.label))
            })
            .collect::<Result<Vec<_>, _>>()?;
        sql.push_str(&outputs.join(", "));
    }

    sql.push_str(&format!(
        " FROM {} AS {}",
        query.from.root.table.qualified_name(),
        query.from.root.alias
    ));
    for join in &query.from.joins {
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
        };
        sql.push_str(&format!(
            " {} {} AS {} ON {} = {}",
            keyword,
            join.table.table.qualified_name(),
            join.table.alias,
            render_column(&join.left),
            render_column(&join.right),
        ));
    }

    match query.filters.as_slice() {
        [] => {}
        [filter] => {
            sql.push_str(" WHERE ");
            sql.push_str(&render_expr(filter, &types)?);
        }
        filters => {
            let rendered = filters
                .iter()
                .map(|filter| render_operand(filter, &types))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&rendered.join(" AND "));
        }
    }

    Ok(sql)
}

/// Declared column types for every alias in the join graph.
fn declared_types(from: &FromClause) -> HashMap<(String, String), ColumnType> {
    let mut types = HashMap::new();
    let aliases = std::iter::once(&from.root).chain(from.joins.iter().map(|join| &join.table));
    for aliased in aliases {
        for column in &aliased.table.columns {
            types.insert(
                (aliased.alias.clone(), column.name.clone()),
                column.column_type,
            );
        }
    }
    types
}

fn render_expr(
    expr: &SqlExpr,
    types: &HashMap<(String, String), ColumnType>,
) -> Result<String, RenderError> {
    match expr {
        SqlExpr::Literal { value } => render_literal(value, "<unbound>"),
        SqlExpr::Column { column } => Ok(render_column(column)),
        SqlExpr::Binary { op, left, right } => {
            check_comparison(left, right, types)?;
            Ok(format!(
                "{} {} {}",
                render_operand(left, types)?,
                op_symbol(*op),
                render_operand(right, types)?,
            ))
        }
        SqlExpr::IsNull { expr } => Ok(format!("{} IS NULL", render_operand(expr, types)?)),
        SqlExpr::IsNotNull { expr } => Ok(format!("{} IS NOT NULL", render_operand(expr, types)?)),
        SqlExpr::InList { column, values } => {
            let declared = types.get(&(column.alias.clone(), column.column.clone()));
            let rendered = values
                .iter()
                .map(|value| {
                    if let Some(expected) = declared {
                        check_literal_type(value, *expected, &column.column)?;
                    }
                    render_literal(value, &column.column)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!(
                "{} IN ({})",
                render_column(column),
                rendered.join(", ")
            ))
        }
        SqlExpr::Case {
            predicate,
            if_true,
            if_false,
        } => Ok(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            render_expr(predicate, types)?,
            render_operand(if_true, types)?,
            render_operand(if_false, types)?,
        )),
    }
}

/// Render a sub-expression, parenthesized unless it is a bare column or
/// literal.
fn render_operand(
    expr: &SqlExpr,
    types: &HashMap<(String, String), ColumnType>,
) -> Result<String, RenderError> {
    let rendered = render_expr(expr, types)?;
    match expr {
        SqlExpr::Column { .. } | SqlExpr::Literal { .. } => Ok(rendered),
        _ => Ok(format!("({})", rendered)),
    }
}

fn render_column(column: &ColumnRef) -> String {
    format!("{}.{}", column.alias, column.column)
}

fn op_symbol(op: SqlOp) -> &'static str {
    match op {
        SqlOp::Eq => "=",
        SqlOp::Ne => "<>",
        SqlOp::Lt => "<",
        SqlOp::Le => "<=",
        SqlOp::Gt => ">",
        SqlOp::Ge => ">=",
        SqlOp::And => "AND",
        SqlOp::Or => "OR",
    }
}

/// When a comparison pairs a column with a literal, check the literal
/// against the column's declared type.
fn check_comparison(
    left: &SqlExpr,
    right: &SqlExpr,
    types: &HashMap<(String, String), ColumnType>,
) -> Result<(), RenderError> {
    let (column, value) = match (left, right) {
        (SqlExpr::Column { column }, SqlExpr::Literal { value }) => (column, value),
        (SqlExpr::Literal { value }, SqlExpr::Column { column }) => (column, value),
        _ => return Ok(()),
    };
    if let Some(expected) = types.get(&(column.alias.clone(), column.column.clone())) {
        check_literal_type(value, *expected, &column.column)?;
    }
    Ok(())
}

fn check_literal_type(
    value: &Value,
    expected: ColumnType,
    column: &str,
) -> Result<(), RenderError> {
    let matches = match (value, expected) {
        // A typed NULL is valid against any declared type.
        (Value::Null, _) => true,
        (Value::Bool(_), ColumnType::Boolean) => true,
        (Value::Int(_), ColumnType::Integer) => true,
        (Value::Int(_), ColumnType::Decimal) => true,
        (Value::Float(_), ColumnType::Decimal) => true,
        (Value::String(_), ColumnType::Text) => true,
        (Value::Date(_), ColumnType::Date) => true,
        (Value::Timestamp(_), ColumnType::Timestamp) => true,
        _ => false,
    };
    if !matches {
        return Err(RenderError::TypeMismatch {
            column: column.to_string(),
            kind: value.kind(),
            expected,
        });
    }
    Ok(())
}

fn render_literal(value: &Value, column: &str) -> Result<String, RenderError> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        Value::Timestamp(t) => format!("TIMESTAMP '{}'", t.format("%Y-%m-%d %H:%M:%S%.3f")),
        Value::List(values) => {
            let rendered = values
                .iter()
                .map(|element| {
                    if matches!(element, Value::List(_)) {
                        return Err(RenderError::NestedList {
                            column: column.to_string(),
                        });
                    }
                    render_literal(element, column)
                })
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", rendered.join(", "))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_render_literal_forms() {
        assert_eq!(render_literal(&Value::Null, "c").unwrap(), "NULL");
        assert_eq!(render_literal(&Value::Bool(true), "c").unwrap(), "TRUE");
        assert_eq!(render_literal(&Value::Int(42), "c").unwrap(), "42");
        assert_eq!(render_literal(&Value::Float(2.5), "c").unwrap(), "2.5");
        assert_eq!(
            render_literal(&Value::String("it's".to_string()), "c").unwrap(),
            "'it''s'"
        );
        assert_eq!(
            render_literal(
                &Value::Date(NaiveDate::from_ymd_opt(2020, 3, 14).unwrap()),
                "c"
            )
            .unwrap(),
            "DATE '2020-03-14'"
        );
        assert_eq!(
            render_literal(
                &Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
                "c"
            )
            .unwrap(),
            "(1, 2, 3)"
        );
    }

    #[test]
    fn test_nested_list_rejected() {
        let nested = Value::List(vec![Value::List(vec![Value::Int(1)])]);
        assert!(matches!(
            render_literal(&nested, "c"),
            Err(RenderError::NestedList { .. })
        ));
    }

    #[test]
    fn test_literal_type_check() {
        assert!(check_literal_type(&Value::Int(1), ColumnType::Integer, "c").is_ok());
        assert!(check_literal_type(&Value::Null, ColumnType::Integer, "c").is_ok());
        assert!(matches!(
            check_literal_type(&Value::String("x".to_string()), ColumnType::Integer, "c"),
            Err(RenderError::TypeMismatch { .. })
        ));
    }
}
