//! # Integration Tests for UPDATE Binding
//!
//! Verifies the scan/projection/update pipeline the binder produces:
//! set-clause validation, constraint-driven column expansion, the
//! delete+insert rewrite, RETURNING, and the row-identifier column.
//!
//! ## Requirements Tested
//!
//! - R1: assignments validate column existence, generated columns, and
//!   duplicate targets
//! - R2: CHECK constraints touching a strict subset of the updated columns
//!   expand the update with self-assignments
//! - R3: updates touching index keys or non-updatable types rewrite into
//!   delete+insert and project all columns
//! - R4: the row identifier is always the last projected column
//! - R5: RETURNING binds a projection over the update's output

use bumpalo::Bump;
use pikedb::schema::{Catalog, CheckConstraint, ColumnDef, IndexDef, TableDef};
use pikedb::sql::ast::{
    BinaryOperator, ColumnRef, Expr, Literal, ReturningItem, TableRef, UpdateSetInfo,
    UpdateStatement,
};
use pikedb::sql::planner::{
    Binder, BoundExpr, ColumnId, LogicalOperator, StatementReturnType,
};
use pikedb::types::DataType;

fn catalog_with_check() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_table(
        TableDef::new(
            "t",
            vec![
                ColumnDef::new("i", DataType::BigInt),
                ColumnDef::new("j", DataType::BigInt),
                ColumnDef::new("name", DataType::Varchar),
            ],
        )
        .with_check(CheckConstraint::new("i + j < 10", [0, 1])),
    );
    catalog
}

fn column<'a>(arena: &'a Bump, name: &'a str) -> &'a Expr<'a> {
    arena.alloc(Expr::Column(ColumnRef {
        table: None,
        column: name,
    }))
}

fn int<'a>(arena: &'a Bump, value: i64) -> &'a Expr<'a> {
    arena.alloc(Expr::Literal(Literal::Int(value)))
}

fn add<'a>(arena: &'a Bump, left: &'a Expr<'a>, right: &'a Expr<'a>) -> &'a Expr<'a> {
    arena.alloc(Expr::BinaryOp {
        left,
        op: BinaryOperator::Add,
        right,
    })
}

fn update_stmt<'a>(
    arena: &'a Bump,
    table: &'a str,
    columns: &[&'a str],
    exprs: &[&'a Expr<'a>],
) -> UpdateStatement<'a> {
    UpdateStatement {
        table: TableRef {
            name: table,
            alias: None,
        },
        from: None,
        where_clause: None,
        set_info: UpdateSetInfo {
            columns: arena.alloc_slice_copy(columns),
            expressions: arena.alloc_slice_copy(exprs),
        },
        returning: None,
    }
}

mod set_clause_tests {
    use super::*;

    #[test]
    fn unknown_column_is_a_bind_error() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["missing"], &[int(&arena, 1)]);
        let err = Binder::new(&catalog).bind_update(&stmt).unwrap_err();
        assert!(err
            .to_string()
            .contains("referenced update column 'missing' not found"));
    }

    #[test]
    fn generated_column_is_rejected() {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("i", DataType::BigInt),
                ColumnDef::new("double_i", DataType::BigInt).with_generated("i * 2"),
            ],
        ));
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["double_i"], &[int(&arena, 1)]);
        let err = Binder::new(&catalog).bind_update(&stmt).unwrap_err();
        assert!(err.to_string().contains("generated column"));
    }

    #[test]
    fn duplicate_assignment_is_rejected() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let stmt = update_stmt(
            &arena,
            "t",
            &["i", "i"],
            &[int(&arena, 1), int(&arena, 2)],
        );
        let err = Binder::new(&catalog).bind_update(&stmt).unwrap_err();
        assert!(err
            .to_string()
            .contains("multiple assignments to same column 'i'"));
    }

    #[test]
    fn view_target_is_rejected() {
        let mut catalog = Catalog::new();
        catalog.register_view("v", "SELECT 1");
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "v", &["x"], &[int(&arena, 1)]);
        let err = Binder::new(&catalog).bind_update(&stmt).unwrap_err();
        assert!(err.to_string().contains("can only update base table"));
    }

    #[test]
    fn default_assignment_binds_without_projection_slot() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let default = &*arena.alloc(Expr::Default);
        let stmt = update_stmt(&arena, "t", &["name"], &[default]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let update = bound.plan.as_update().unwrap();
        assert!(matches!(
            update.expressions[0],
            BoundExpr::Default {
                return_type: DataType::Varchar
            }
        ));
        // The projection still exists and carries only the row identifier.
        match update.input.as_ref() {
            LogicalOperator::Projection(proj) => assert_eq!(proj.expressions.len(), 1),
            other => panic!("expected projection under update, got {:?}", other),
        }
    }

    #[test]
    fn assignment_is_cast_to_the_column_type() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        // name is varchar; assigning an integer coerces through a cast.
        let stmt = update_stmt(&arena, "t", &["name"], &[int(&arena, 42)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        let update = bound.plan.as_update().unwrap();
        match update.input.as_ref() {
            LogicalOperator::Projection(proj) => {
                assert!(matches!(
                    proj.expressions[0],
                    BoundExpr::Cast {
                        target: DataType::Varchar,
                        ..
                    }
                ));
            }
            other => panic!("expected projection under update, got {:?}", other),
        }
    }
}

mod constraint_tests {
    use super::*;

    #[test]
    fn partial_check_update_adds_self_assignment() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let expr = add(&arena, column(&arena, "i"), int(&arena, 1));
        let stmt = update_stmt(&arena, "t", &["i"], &[expr]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let update = bound.plan.as_update().unwrap();
        assert_eq!(update.columns, vec![0, 1]);
        assert_eq!(update.columns.len(), update.expressions.len());

        let get = bound.plan.target_get().unwrap();
        assert!(get.column_ids.contains(&ColumnId::Physical(0)));
        assert!(get.column_ids.contains(&ColumnId::Physical(1)));
        assert_eq!(*get.column_ids.last().unwrap(), ColumnId::RowId);

        // The self-assignment references a fresh projection slot, which in
        // turn references the scan.
        match &update.expressions[1] {
            BoundExpr::ColumnRef { binding, .. } => {
                match update.input.as_ref() {
                    LogicalOperator::Projection(proj) => {
                        assert_eq!(binding.table_index, proj.table_index);
                        match &proj.expressions[binding.ordinal] {
                            BoundExpr::ColumnRef { binding, .. } => {
                                assert_eq!(binding.table_index, get.table_index);
                            }
                            other => panic!("expected scan reference, got {:?}", other),
                        }
                    }
                    other => panic!("expected projection, got {:?}", other),
                }
            }
            other => panic!("expected column reference, got {:?}", other),
        }
    }

    #[test]
    fn full_check_update_needs_no_expansion() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let stmt = update_stmt(
            &arena,
            "t",
            &["i", "j"],
            &[int(&arena, 1), int(&arena, 2)],
        );
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        let update = bound.plan.as_update().unwrap();
        assert_eq!(update.columns, vec![0, 1]);
    }

    #[test]
    fn single_column_check_never_expands() {
        let mut catalog = Catalog::new();
        catalog.register_table(
            TableDef::new(
                "t",
                vec![
                    ColumnDef::new("i", DataType::BigInt),
                    ColumnDef::new("j", DataType::BigInt),
                ],
            )
            .with_check(CheckConstraint::new("i >= 0", [0])),
        );
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 5)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        assert_eq!(bound.plan.as_update().unwrap().columns, vec![0]);
    }

    #[test]
    fn index_touch_flips_to_delete_insert_and_expands() {
        let mut catalog = Catalog::new();
        catalog.register_table(
            TableDef::new(
                "t",
                vec![
                    ColumnDef::new("i", DataType::BigInt),
                    ColumnDef::new("j", DataType::BigInt),
                    ColumnDef::new("k", DataType::BigInt),
                ],
            )
            .with_index(IndexDef::new("t_ij", [0, 1], true)),
        );
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        let update = bound.plan.as_update().unwrap();
        assert!(update.update_is_del_and_insert);
        // The del+insert rewrite projects every table column.
        let mut columns = update.columns.clone();
        columns.sort_unstable();
        assert_eq!(columns, vec![0, 1, 2]);
    }

    #[test]
    fn list_column_update_flips_to_delete_insert() {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::BigInt),
                ColumnDef::new("tags", DataType::List(Box::new(DataType::Varchar))),
            ],
        ));
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["tags"], &[column(&arena, "tags")]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        assert!(bound.plan.as_update().unwrap().update_is_del_and_insert);
    }

    #[test]
    fn untouched_index_keeps_in_place_update() {
        let mut catalog = Catalog::new();
        catalog.register_table(
            TableDef::new(
                "t",
                vec![
                    ColumnDef::new("i", DataType::BigInt),
                    ColumnDef::new("j", DataType::BigInt),
                ],
            )
            .with_index(IndexDef::new("t_j", [1], false)),
        );
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        assert!(!bound.plan.as_update().unwrap().update_is_del_and_insert);
    }
}

mod plan_shape_tests {
    use super::*;

    #[test]
    fn where_clause_wraps_the_scan_in_a_filter() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let mut stmt = update_stmt(&arena, "t", &["name"], &[int(&arena, 1)]);
        let predicate = arena.alloc(Expr::Between {
            input: column(&arena, "j"),
            lower: int(&arena, 1),
            upper: int(&arena, 10),
            negated: false,
        });
        stmt.where_clause = Some(predicate);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let update = bound.plan.as_update().unwrap();
        match update.input.as_ref() {
            LogicalOperator::Projection(proj) => match proj.input.as_ref() {
                LogicalOperator::Filter(filter) => {
                    assert!(matches!(filter.predicate, BoundExpr::Between { .. }));
                }
                other => panic!("expected filter under projection, got {:?}", other),
            },
            other => panic!("expected projection under update, got {:?}", other),
        }
    }

    #[test]
    fn from_clause_cross_products_with_target_as_child_zero() {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "t",
            vec![ColumnDef::new("i", DataType::BigInt)],
        ));
        catalog.register_table(TableDef::new(
            "u",
            vec![ColumnDef::new("v", DataType::BigInt)],
        ));
        let arena = Bump::new();
        let mut stmt = update_stmt(&arena, "t", &["i"], &[column(&arena, "v")]);
        stmt.from = Some(TableRef {
            name: "u",
            alias: None,
        });
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let get = bound.plan.target_get().unwrap();
        assert_eq!(get.table_name, "t");
        // The FROM table's column feeds the assignment through the
        // projection.
        let update = bound.plan.as_update().unwrap();
        assert!(matches!(update.expressions[0], BoundExpr::ColumnRef { .. }));
    }

    #[test]
    fn plain_update_returns_a_count_column() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        assert_eq!(bound.names, vec!["Count"]);
        assert_eq!(bound.types, vec![DataType::BigInt]);
        assert!(!bound.properties.allow_stream_result);
        assert_eq!(
            bound.properties.return_type,
            StatementReturnType::ChangedRows
        );
        assert_eq!(bound.properties.modified_tables, vec!["t"]);
    }

    #[test]
    fn temporary_table_is_not_marked_modified() {
        let mut catalog = Catalog::new();
        catalog.register_table(
            TableDef::new("tmp", vec![ColumnDef::new("i", DataType::BigInt)])
                .with_temporary(true),
        );
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "tmp", &["i"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        assert!(bound.properties.modified_tables.is_empty());
    }

    #[test]
    fn row_identifier_is_always_projected_last() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["name"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let get = bound.plan.target_get().unwrap();
        assert_eq!(*get.column_ids.last().unwrap(), ColumnId::RowId);
        let update = bound.plan.as_update().unwrap();
        match update.input.as_ref() {
            LogicalOperator::Projection(proj) => {
                match proj.expressions.last().unwrap() {
                    BoundExpr::ColumnRef {
                        binding,
                        return_type,
                    } => {
                        assert_eq!(*return_type, DataType::BigInt);
                        assert_eq!(binding.ordinal, get.column_ids.len() - 1);
                    }
                    other => panic!("expected row-id reference, got {:?}", other),
                }
            }
            other => panic!("expected projection under update, got {:?}", other),
        }
    }
}

mod returning_tests {
    use super::*;

    fn list_table_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::BigInt),
                ColumnDef::new("tags", DataType::List(Box::new(DataType::Varchar))),
                ColumnDef::new("name", DataType::Varchar),
            ],
        ));
        catalog
    }

    #[test]
    fn returning_star_expands_everything_and_appends_rowid() {
        let catalog = list_table_catalog();
        let arena = Bump::new();
        let mut stmt = update_stmt(&arena, "t", &["id"], &[int(&arena, 1)]);
        let items = arena.alloc_slice_copy(&[ReturningItem::Wildcard]);
        stmt.returning = Some(items);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        // RETURNING plans as a projection over the update.
        let update = match &bound.plan {
            LogicalOperator::Projection(proj) => match proj.input.as_ref() {
                LogicalOperator::Update(update) => update,
                other => panic!("expected update under projection, got {:?}", other),
            },
            other => panic!("expected projection root, got {:?}", other),
        };
        assert!(update.return_chunk);
        // A list column exists, so RETURNING forces delete+insert and the
        // whole row image is projected.
        assert!(update.update_is_del_and_insert);
        let mut columns = update.columns.clone();
        columns.sort_unstable();
        assert_eq!(columns, vec![0, 1, 2]);

        let get = bound.plan.target_get().unwrap();
        assert_eq!(*get.column_ids.last().unwrap(), ColumnId::RowId);

        assert_eq!(bound.names, vec!["id", "tags", "name"]);
        assert_eq!(
            bound.properties.return_type,
            StatementReturnType::QueryResult
        );
    }

    #[test]
    fn returning_star_bindings_follow_update_output_order() {
        // Assigning a non-leading column puts the update's output row image
        // out of canonical order: the SET column comes first, then the
        // expansion columns. RETURNING bindings must follow that order.
        let catalog = list_table_catalog();
        let arena = Bump::new();
        let value = &*arena.alloc(Expr::Literal(Literal::String("x")));
        let mut stmt = update_stmt(&arena, "t", &["name"], &[value]);
        let items = arena.alloc_slice_copy(&[ReturningItem::Wildcard]);
        stmt.returning = Some(items);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let (returning, update) = match &bound.plan {
            LogicalOperator::Projection(proj) => match proj.input.as_ref() {
                LogicalOperator::Update(update) => (proj, update),
                other => panic!("expected update under projection, got {:?}", other),
            },
            other => panic!("expected projection root, got {:?}", other),
        };
        // Insertion order: the SET column, then the expanded columns.
        assert_eq!(update.columns, vec![2, 0, 1]);
        assert_eq!(bound.names, vec!["id", "tags", "name"]);
        assert_eq!(
            bound.types,
            vec![
                DataType::BigInt,
                DataType::List(Box::new(DataType::Varchar)),
                DataType::Varchar,
            ]
        );

        // Each returned column addresses the slot it occupies in
        // `update.columns`, not its canonical physical index.
        for (out, physical) in [(0usize, 0usize), (1, 1), (2, 2)] {
            let expected_ordinal = update
                .columns
                .iter()
                .position(|&c| c == physical)
                .unwrap();
            match &returning.expressions[out] {
                BoundExpr::ColumnRef {
                    binding,
                    return_type,
                } => {
                    assert_eq!(binding.table_index, update.table_index);
                    assert_eq!(
                        binding.ordinal, expected_ordinal,
                        "column '{}' bound to the wrong output slot",
                        bound.names[out]
                    );
                    assert_eq!(*return_type, bound.types[out]);
                }
                other => panic!("expected column reference, got {:?}", other),
            }
        }
        // Spot-check the reordering: 'id' (physical 0) sits at output
        // ordinal 1, 'name' (physical 2) at ordinal 0.
        match &returning.expressions[0] {
            BoundExpr::ColumnRef { binding, .. } => assert_eq!(binding.ordinal, 1),
            other => panic!("expected column reference, got {:?}", other),
        }
        match &returning.expressions[2] {
            BoundExpr::ColumnRef { binding, .. } => assert_eq!(binding.ordinal, 0),
            other => panic!("expected column reference, got {:?}", other),
        }
    }

    #[test]
    fn returning_named_column_follows_update_output_order() {
        let catalog = list_table_catalog();
        let arena = Bump::new();
        let value = &*arena.alloc(Expr::Literal(Literal::String("x")));
        let mut stmt = update_stmt(&arena, "t", &["name"], &[value]);
        let item = ReturningItem::Expr {
            expr: column(&arena, "id"),
            alias: None,
        };
        let items = arena.alloc_slice_copy(&[item]);
        stmt.returning = Some(items);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let (returning, update) = match &bound.plan {
            LogicalOperator::Projection(proj) => match proj.input.as_ref() {
                LogicalOperator::Update(update) => (proj, update),
                other => panic!("expected update under projection, got {:?}", other),
            },
            other => panic!("expected projection root, got {:?}", other),
        };
        assert_eq!(update.columns, vec![2, 0, 1]);
        assert_eq!(bound.names, vec!["id"]);
        // 'id' is physical column 0 but occupies output ordinal 1.
        match &returning.expressions[0] {
            BoundExpr::ColumnRef { binding, .. } => {
                assert_eq!(binding.table_index, update.table_index);
                assert_eq!(binding.ordinal, 1);
            }
            other => panic!("expected column reference, got {:?}", other),
        }
    }

    #[test]
    fn returning_expression_resolves_against_the_row_image() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let mut stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let expr = add(&arena, column(&arena, "i"), column(&arena, "j"));
        let item = ReturningItem::Expr {
            expr,
            alias: Some("total"),
        };
        let items = arena.alloc_slice_copy(&[item]);
        stmt.returning = Some(items);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        assert_eq!(bound.names, vec!["total"]);
        assert_eq!(bound.types, vec![DataType::BigInt]);
    }

    #[test]
    fn returning_marks_return_chunk_before_expansion() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let mut stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let items = arena.alloc_slice_copy(&[ReturningItem::Wildcard]);
        stmt.returning = Some(items);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let update = bound.plan.as_update().unwrap();
        assert!(update.return_chunk);
        // RETURNING expands the update set to every column even without
        // del+insert.
        let mut columns = update.columns.clone();
        columns.sort_unstable();
        assert_eq!(columns, vec![0, 1, 2]);
        assert!(!update.update_is_del_and_insert);
    }
}

mod invariant_tests {
    use super::*;

    #[test]
    fn bound_update_satisfies_structural_invariants() {
        let catalog = catalog_with_check();
        let arena = Bump::new();
        let expr = add(&arena, column(&arena, "i"), int(&arena, 1));
        let stmt = update_stmt(&arena, "t", &["i"], &[expr]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();

        let update = bound.plan.as_update().unwrap();
        // Duplicate-free columns, parallel to expressions.
        let mut seen = update.columns.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), update.columns.len());
        assert_eq!(update.columns.len(), update.expressions.len());
        // Defaults cover every table column.
        assert_eq!(update.bound_defaults.len(), 3);

        // Every updated column is scanned.
        let get = bound.plan.target_get().unwrap();
        for physical in &update.columns {
            assert!(get.column_ids.contains(&ColumnId::Physical(*physical)));
        }
    }

    #[test]
    fn bound_defaults_parse_declared_defaults() {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("i", DataType::BigInt).with_default("42"),
                ColumnDef::new("name", DataType::Varchar).with_default("'anon'"),
            ],
        ));
        let arena = Bump::new();
        let stmt = update_stmt(&arena, "t", &["i"], &[int(&arena, 1)]);
        let bound = Binder::new(&catalog).bind_update(&stmt).unwrap();
        let update = bound.plan.as_update().unwrap();
        assert!(matches!(
            &update.bound_defaults[0],
            BoundExpr::Literal {
                value: pikedb::types::ScalarValue::Int(42)
            }
        ));
    }
}
