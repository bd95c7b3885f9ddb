//! # UPDATE Binding
//!
//! Rewrites an UPDATE parse tree into a scan/projection/update pipeline.
//!
//! ## Pipeline
//!
//! 1. **Set-clause binding**: each `col = expr` pair is validated (column
//!    exists, is not generated, is not assigned twice) and bound. Non-DEFAULT
//!    expressions land in the projection; the update node references them by
//!    projection slot.
//! 2. **Constraint-driven column expansion**: CHECK constraints that touch a
//!    strict non-empty subset of the updated columns get their missing
//!    columns added as self-assignments (`c = c`) so the constraint can be
//!    re-evaluated on the complete post-update row image. RETURNING expands
//!    to all columns. Updates touching index keys or non-updatable column
//!    types (lists, maps, unions, structs containing one) are rewritten into
//!    delete+insert, which also expands to all columns.
//! 3. **Plan assembly**: filter, optional FROM cross product, projection,
//!    update; the row-identifier column is appended last to the scan and the
//!    projection.
//!
//! Without RETURNING the statement yields a single `BIGINT` column named
//! `"Count"` and forbids streaming.

use super::logical::{
    column_ref, BoundExpr, ColumnBinding, ColumnId, LogicalCrossProduct, LogicalFilter,
    LogicalGet, LogicalOperator, LogicalProjection, LogicalUpdate,
};
use super::{Binder, BoundStatement, StatementProperties, StatementReturnType};
use crate::schema::TableDef;
use crate::sql::ast::{ColumnRef, Expr, ReturningItem, UpdateStatement};
use crate::types::{DataType, ScalarValue};
use eyre::{bail, ensure, Result};
use hashbrown::HashSet;
use tracing::debug;

/// A table visible to expression binding. Resolving a column through the
/// scope registers it on the owning scan's projected column list.
struct ScopeTable<'t> {
    alias: Option<&'t str>,
    def: &'t TableDef,
    get: &'t mut LogicalGet,
}

impl ScopeTable<'_> {
    fn effective_name(&self) -> &str {
        self.alias.unwrap_or_else(|| self.def.name())
    }

    fn bind(&mut self, physical: usize) -> (ColumnBinding, DataType) {
        let ordinal = self.get.project_column(ColumnId::Physical(physical));
        (
            ColumnBinding::new(self.get.table_index, ordinal),
            self.def.column(physical).data_type().clone(),
        )
    }
}

fn resolve_in_scope(
    scope: &mut [ScopeTable<'_>],
    col: &ColumnRef<'_>,
) -> Result<(ColumnBinding, DataType)> {
    if let Some(qualifier) = col.table {
        for entry in scope.iter_mut() {
            if entry.effective_name().eq_ignore_ascii_case(qualifier) {
                match entry.def.column_index(col.column) {
                    Some(physical) => return Ok(entry.bind(physical)),
                    None => bail!("column '{}' not found in table '{}'", col.column, qualifier),
                }
            }
        }
        bail!("table '{}' not found in scope", qualifier)
    } else {
        let mut matching: Option<(usize, usize)> = None;
        let mut ambiguous: Vec<&str> = Vec::new();
        for (idx, entry) in scope.iter().enumerate() {
            if let Some(physical) = entry.def.column_index(col.column) {
                if matching.is_none() {
                    matching = Some((idx, physical));
                }
                ambiguous.push(entry.def.name());
            }
        }
        match (matching, ambiguous.len()) {
            (Some((idx, physical)), 1) => Ok(scope[idx].bind(physical)),
            (None, _) => bail!("column '{}' not found in any table in scope", col.column),
            (_, _) => bail!(
                "column '{}' is ambiguous (found in tables: {})",
                col.column,
                ambiguous.join(", ")
            ),
        }
    }
}

impl<'a> Binder<'a> {
    /// Bind an UPDATE statement into a logical plan.
    pub fn bind_update(&mut self, stmt: &UpdateStatement<'_>) -> Result<BoundStatement> {
        let catalog = self.catalog();
        let table = catalog.resolve_table(stmt.table.name)?;

        let mut properties = StatementProperties::default();
        if !table.is_temporary() {
            properties.modified_tables.push(table.name().to_string());
        }

        let mut target_get = LogicalGet::new(self.generate_table_index(), table.name());
        let mut from = match stmt.from {
            Some(from_ref) => {
                let from_table = catalog.resolve_table(from_ref.name)?;
                let get = LogicalGet::new(self.generate_table_index(), from_table.name());
                Some((from_ref, from_table, get))
            }
            None => None,
        };

        let proj_index = self.generate_table_index();
        let return_chunk = stmt.returning.is_some();
        let bound_defaults = bind_default_values(table);

        let mut update_columns: Vec<usize> = Vec::new();
        let mut update_exprs: Vec<BoundExpr> = Vec::new();
        let mut proj_exprs: Vec<BoundExpr> = Vec::new();
        let where_bound;

        {
            let mut scope: Vec<ScopeTable<'_>> = vec![ScopeTable {
                alias: stmt.table.alias,
                def: table,
                get: &mut target_get,
            }];
            if let Some((from_ref, from_table, from_get)) = from.as_mut() {
                scope.push(ScopeTable {
                    alias: from_ref.alias,
                    def: *from_table,
                    get: from_get,
                });
            }
            let mut resolver = |col: &ColumnRef<'_>| resolve_in_scope(&mut scope, col);

            where_bound = match stmt.where_clause {
                Some(predicate) => {
                    Some(self.bind_expression(predicate, &mut resolver, Some(&DataType::Bool))?)
                }
                None => None,
            };

            let set_info = &stmt.set_info;
            ensure!(
                set_info.columns.len() == set_info.expressions.len(),
                "UPDATE SET column and expression lists differ in length"
            );
            for (colname, expr) in set_info.columns.iter().zip(set_info.expressions.iter()) {
                let physical = match table.column_index(colname) {
                    Some(physical) => physical,
                    None => bail!(
                        "referenced update column '{}' not found in table '{}'",
                        colname,
                        table.name()
                    ),
                };
                let column = table.column(physical);
                if column.is_generated() {
                    bail!(
                        "cannot update column '{}' because it is a generated column",
                        column.name()
                    );
                }
                if update_columns.contains(&physical) {
                    bail!("multiple assignments to same column '{}'", colname);
                }
                update_columns.push(physical);

                if matches!(**expr, Expr::Default) {
                    update_exprs.push(BoundExpr::Default {
                        return_type: column.data_type().clone(),
                    });
                } else {
                    let bound =
                        self.bind_expression(expr, &mut resolver, Some(column.data_type()))?;
                    update_exprs.push(BoundExpr::ColumnRef {
                        binding: ColumnBinding::new(proj_index, proj_exprs.len()),
                        return_type: bound.return_type(),
                    });
                    proj_exprs.push(bound);
                }
            }
        }

        let update_is_del_and_insert = bind_update_constraints(
            table,
            &mut target_get,
            proj_index,
            &mut proj_exprs,
            &mut update_columns,
            &mut update_exprs,
            return_chunk,
        );

        // The row identifier is always the last projected column.
        let rowid_ordinal = {
            target_get.column_ids.push(ColumnId::RowId);
            target_get.column_ids.len() - 1
        };
        proj_exprs.push(BoundExpr::ColumnRef {
            binding: ColumnBinding::new(target_get.table_index, rowid_ordinal),
            return_type: DataType::BigInt,
        });

        let mut root = LogicalOperator::Get(target_get);
        if let Some((_, _, from_get)) = from {
            root = LogicalOperator::CrossProduct(LogicalCrossProduct {
                left: Box::new(root),
                right: Box::new(LogicalOperator::Get(from_get)),
            });
        }
        if let Some(predicate) = where_bound {
            root = LogicalOperator::Filter(LogicalFilter {
                predicate,
                input: Box::new(root),
            });
        }
        let projection = LogicalOperator::Projection(LogicalProjection {
            table_index: proj_index,
            expressions: proj_exprs,
            input: Box::new(root),
        });

        let update_table_index = self.generate_table_index();
        let update = LogicalUpdate {
            table_name: table.name().to_string(),
            table_index: update_table_index,
            columns: update_columns,
            expressions: update_exprs,
            return_chunk,
            update_is_del_and_insert,
            bound_defaults,
            input: Box::new(projection),
        };

        match stmt.returning {
            Some(items) => self.bind_returning(items, table, stmt.table.alias, update, properties),
            None => {
                properties.allow_stream_result = false;
                properties.return_type = StatementReturnType::ChangedRows;
                Ok(BoundStatement {
                    plan: LogicalOperator::Update(update),
                    names: vec!["Count".to_string()],
                    types: vec![DataType::BigInt],
                    properties,
                })
            }
        }
    }

    /// Bind a RETURNING list as a projection over the update's output row
    /// image.
    fn bind_returning(
        &mut self,
        items: &[ReturningItem<'_>],
        table: &TableDef,
        table_alias: Option<&str>,
        update: LogicalUpdate,
        mut properties: StatementProperties,
    ) -> Result<BoundStatement> {
        let update_index = update.table_index;
        let returning_index = self.generate_table_index();

        let mut names = Vec::new();
        let mut types = Vec::new();
        let mut expressions = Vec::new();

        // The update's output row image is ordered by `update.columns`
        // (insertion order), not by canonical physical order; RETURNING
        // bindings must address the slot a column actually occupies there.
        // The RETURNING expansion has already projected every table column.
        let output_ordinal = |physical: usize| {
            update
                .columns
                .iter()
                .position(|&c| c == physical)
                .expect("RETURNING expansion projects every table column")
        };

        for item in items {
            match item {
                ReturningItem::Wildcard => {
                    for (physical, column) in table.columns().iter().enumerate() {
                        names.push(column.name().to_string());
                        types.push(column.data_type().clone());
                        expressions.push(BoundExpr::ColumnRef {
                            binding: ColumnBinding::new(update_index, output_ordinal(physical)),
                            return_type: column.data_type().clone(),
                        });
                    }
                }
                ReturningItem::Expr { expr, alias } => {
                    let mut resolver = |col: &ColumnRef<'_>| {
                        if let Some(qualifier) = col.table {
                            let effective = table_alias.unwrap_or_else(|| table.name());
                            if !effective.eq_ignore_ascii_case(qualifier) {
                                bail!("table '{}' not found in scope", qualifier);
                            }
                        }
                        match table.column_index(col.column) {
                            Some(physical) => Ok((
                                ColumnBinding::new(update_index, output_ordinal(physical)),
                                table.column(physical).data_type().clone(),
                            )),
                            None => bail!(
                                "column '{}' not found in table '{}'",
                                col.column,
                                table.name()
                            ),
                        }
                    };
                    let bound = self.bind_expression(expr, &mut resolver, None)?;
                    names.push(match alias {
                        Some(alias) => (*alias).to_string(),
                        None => expr.to_string(),
                    });
                    types.push(bound.return_type());
                    expressions.push(bound);
                }
            }
        }

        properties.return_type = StatementReturnType::QueryResult;
        Ok(BoundStatement {
            plan: LogicalOperator::Projection(LogicalProjection {
                table_index: returning_index,
                expressions,
                input: Box::new(LogicalOperator::Update(update)),
            }),
            names,
            types,
            properties,
        })
    }
}

/// Add every column of `bound_columns` that is not yet updated as a
/// self-assignment, provided the update already touches a strict non-empty
/// subset of the set. Single-column sets never need expansion.
fn bind_extra_columns(
    table: &TableDef,
    get: &mut LogicalGet,
    proj_index: usize,
    proj_exprs: &mut Vec<BoundExpr>,
    update_columns: &mut Vec<usize>,
    update_exprs: &mut Vec<BoundExpr>,
    bound_columns: &HashSet<usize>,
) {
    if bound_columns.len() <= 1 {
        return;
    }
    let found: HashSet<usize> = update_columns
        .iter()
        .copied()
        .filter(|c| bound_columns.contains(c))
        .collect();
    if found.is_empty() || found.len() == bound_columns.len() {
        return;
    }
    let mut missing: Vec<usize> = bound_columns.difference(&found).copied().collect();
    missing.sort_unstable();
    for physical in missing {
        let ordinal = get.project_column(ColumnId::Physical(physical));
        update_exprs.push(column_ref(
            ColumnBinding::new(proj_index, proj_exprs.len()),
            table,
            physical,
        ));
        proj_exprs.push(column_ref(
            ColumnBinding::new(get.table_index, ordinal),
            table,
            physical,
        ));
        update_columns.push(physical);
    }
}

/// Inspect CHECK constraints, RETURNING, indexes, and non-updatable column
/// types, expanding the projected column set and deciding whether the update
/// must run as delete+insert. Returns the del+insert flag.
fn bind_update_constraints(
    table: &TableDef,
    get: &mut LogicalGet,
    proj_index: usize,
    proj_exprs: &mut Vec<BoundExpr>,
    update_columns: &mut Vec<usize>,
    update_exprs: &mut Vec<BoundExpr>,
    return_chunk: bool,
) -> bool {
    // A constraint CHECK(i + j < 10) needs both i and j on the post-update
    // row image even when only one of them is assigned.
    for check in table.checks() {
        let bound: HashSet<usize> = check.bound_columns().iter().copied().collect();
        bind_extra_columns(
            table,
            get,
            proj_index,
            proj_exprs,
            update_columns,
            update_exprs,
            &bound,
        );
    }

    let all_columns: HashSet<usize> = (0..table.columns().len()).collect();
    if return_chunk {
        bind_extra_columns(
            table,
            get,
            proj_index,
            proj_exprs,
            update_columns,
            update_exprs,
            &all_columns,
        );
    }

    let mut del_and_insert = false;
    for index in table.indexes() {
        if index.is_updated(update_columns) {
            debug!(
                table = table.name(),
                index = index.name(),
                "update touches index key, rewriting as delete+insert"
            );
            del_and_insert = true;
            break;
        }
    }

    if !del_and_insert {
        for &physical in update_columns.iter() {
            if !table.column(physical).data_type().supports_regular_update() {
                debug!(
                    table = table.name(),
                    column = table.column(physical).name(),
                    "column type does not support in-place update, rewriting as delete+insert"
                );
                del_and_insert = true;
                break;
            }
        }
    }

    if del_and_insert {
        bind_extra_columns(
            table,
            get,
            proj_index,
            proj_exprs,
            update_columns,
            update_exprs,
            &all_columns,
        );
    }
    del_and_insert
}

/// Bind one default expression per table column, in physical order. Columns
/// without a declared default bind to NULL.
fn bind_default_values(table: &TableDef) -> Vec<BoundExpr> {
    table
        .columns()
        .iter()
        .map(|column| {
            let value = match column.default_value() {
                Some(text) => parse_default_literal(text),
                None => ScalarValue::Null,
            };
            let bound = BoundExpr::Literal { value };
            if bound.return_type() != *column.data_type()
                && bound.return_type() != DataType::Null
            {
                BoundExpr::Cast {
                    expr: Box::new(bound),
                    target: column.data_type().clone(),
                }
            } else {
                bound
            }
        })
        .collect()
}

fn parse_default_literal(text: &str) -> ScalarValue {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return ScalarValue::Null;
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return ScalarValue::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return ScalarValue::Bool(false);
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return ScalarValue::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return ScalarValue::Double(v);
    }
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed);
    ScalarValue::Varchar(unquoted.to_string())
}
