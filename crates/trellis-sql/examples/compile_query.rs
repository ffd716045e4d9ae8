//! Compile a small traversal against a hand-authored schema and print the
//! resulting SQL. Run with: cargo run --example compile_query
//!
//! RUST_LOG=trace shows the emitter's per-block walk.

use std::collections::BTreeMap;

use tracing_subscriber::EnvFilter;
use trellis_ir::{
    BinOp, Block, Direction, Expr, IrQuery, LocationInfo, QueryMetadata, QueryPath, Value,
};
use trellis_sql::{compile, render_sql, Column, ColumnType, EdgeJoin, SqlMetadata, Table};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut builder = SqlMetadata::builder();
    builder.add_table(
        "Animal",
        Table::new(
            "Animal",
            vec![
                Column::new("uuid", ColumnType::Text, false),
                Column::new("name", ColumnType::Text, false),
                Column::new("parent", ColumnType::Text, true),
            ],
        )
        .with_schema("Animals.schema_1"),
    );
    builder.add_edge(
        "Animal",
        "out_Animal_ParentOf",
        EdgeJoin {
            to_type: "Animal".to_string(),
            from_column: "parent".to_string(),
            to_column: "uuid".to_string(),
        },
    );
    let sql_metadata = builder.build()?;

    // Animals named Rex, together with their parent's name when one exists.
    let root = QueryPath::root();
    let parent = root.extend("out_Animal_ParentOf");
    let mut metadata = QueryMetadata::new(root.clone());
    metadata.record(
        root.clone(),
        LocationInfo {
            type_name: "Animal".to_string(),
            optional_depth: 0,
        },
    );
    metadata.record(
        parent.clone(),
        LocationInfo {
            type_name: "Animal".to_string(),
            optional_depth: 1,
        },
    );

    let query = IrQuery {
        blocks: vec![
            Block::QueryRoot {
                start_type: "Animal".to_string(),
            },
            Block::Filter {
                predicate: Expr::binary(
                    BinOp::Eq,
                    Expr::LocalField {
                        field_name: "name".to_string(),
                    },
                    Expr::literal(Value::String("Rex".to_string())),
                ),
            },
            Block::MarkLocation,
            Block::Traverse {
                direction: Direction::Out,
                edge_name: "Animal_ParentOf".to_string(),
                optional: true,
            },
            Block::MarkLocation,
            Block::EndOptional,
            Block::GlobalOperationsStart,
            Block::ConstructResult {
                fields: BTreeMap::from([
                    (
                        "animal_name".to_string(),
                        Expr::OutputField {
                            location: root,
                            field_name: "name".to_string(),
                        },
                    ),
                    (
                        "parent_name".to_string(),
                        Expr::Ternary {
                            predicate: Box::new(Expr::BranchExistence {
                                location: parent.clone(),
                            }),
                            if_true: Box::new(Expr::OutputField {
                                location: parent,
                                field_name: "name".to_string(),
                            }),
                            if_false: Box::new(Expr::literal(Value::Null)),
                        },
                    ),
                ]),
            },
        ],
        metadata,
    };

    println!("fingerprint: {}", query.fingerprint());

    let plan = compile(&query, &sql_metadata)?;
    println!("{}", render_sql(&plan)?);

    Ok(())
}
