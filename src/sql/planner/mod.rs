//! # Planner
//!
//! The binding pass turning parsed statements into bound logical plans. The
//! only statement bound here is UPDATE; SELECT planning, optimization, and
//! physical planning are separate concerns.
//!
//! ## Binding Pipeline (UPDATE)
//!
//! ```text
//! UpdateStatement (parse tree)
//!        │  resolve target table, FROM tables
//!        │  bind WHERE, SET expressions
//!        ▼
//! Get ─> [CrossProduct] ─> [Filter] ─> Projection ─> Update
//!        │  expand columns for CHECK constraints / RETURNING /
//!        │  index keys / non-updatable types
//!        ▼
//! BoundStatement { plan, names, types, properties }
//! ```
//!
//! Expression binding resolves column references through a caller-provided
//! resolver, so the same walker serves both table scopes (which register
//! projected columns on the scan) and the RETURNING scope (which addresses
//! the update's output row image).

pub mod logical;
pub mod update;

pub use logical::{
    BoundExpr, ColumnBinding, ColumnId, LogicalCrossProduct, LogicalFilter, LogicalGet,
    LogicalOperator, LogicalProjection, LogicalUpdate,
};

use crate::schema::Catalog;
use crate::sql::ast::{BinaryOperator, ColumnRef, Expr, Literal, UnaryOperator};
use crate::types::{DataType, ScalarValue};
use eyre::{bail, Result};

/// What a bound statement returns to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementReturnType {
    QueryResult,
    ChangedRows,
}

#[derive(Debug, Clone)]
pub struct StatementProperties {
    pub allow_stream_result: bool,
    pub return_type: StatementReturnType,
    /// Tables whose contents this statement modifies (temporary tables are
    /// excluded).
    pub modified_tables: Vec<String>,
}

impl Default for StatementProperties {
    fn default() -> Self {
        Self {
            allow_stream_result: true,
            return_type: StatementReturnType::QueryResult,
            modified_tables: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct BoundStatement {
    pub plan: LogicalOperator,
    pub names: Vec<String>,
    pub types: Vec<DataType>,
    pub properties: StatementProperties,
}

/// Resolves a parsed column reference to an operator output binding.
pub(crate) type ColumnResolver<'r> =
    dyn FnMut(&ColumnRef<'_>) -> Result<(ColumnBinding, DataType)> + 'r;

pub struct Binder<'a> {
    catalog: &'a Catalog,
    next_table_index: usize,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            next_table_index: 0,
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub(crate) fn generate_table_index(&mut self) -> usize {
        let index = self.next_table_index;
        self.next_table_index += 1;
        index
    }

    /// Bind an expression, coercing the result to `target` when given.
    pub(crate) fn bind_expression(
        &self,
        expr: &Expr<'_>,
        resolve: &mut ColumnResolver<'_>,
        target: Option<&DataType>,
    ) -> Result<BoundExpr> {
        let bound = self.bind_expression_inner(expr, resolve)?;
        Ok(match target {
            Some(ty) if *ty != bound.return_type() => BoundExpr::Cast {
                expr: Box::new(bound),
                target: ty.clone(),
            },
            _ => bound,
        })
    }

    fn bind_expression_inner(
        &self,
        expr: &Expr<'_>,
        resolve: &mut ColumnResolver<'_>,
    ) -> Result<BoundExpr> {
        Ok(match expr {
            Expr::Literal(lit) => BoundExpr::Literal {
                value: match lit {
                    Literal::Null => ScalarValue::Null,
                    Literal::Bool(b) => ScalarValue::Bool(*b),
                    Literal::Int(v) => ScalarValue::Int(*v),
                    Literal::Double(v) => ScalarValue::Double(*v),
                    Literal::String(s) => ScalarValue::Varchar((*s).to_string()),
                },
            },
            Expr::Column(col) => {
                let (binding, return_type) = resolve(col)?;
                BoundExpr::ColumnRef {
                    binding,
                    return_type,
                }
            }
            Expr::BinaryOp { left, op, right } => {
                let left = self.bind_expression_inner(left, resolve)?;
                let right = self.bind_expression_inner(right, resolve)?;
                let return_type = if op.is_comparison() || op.is_logical() {
                    DataType::Bool
                } else if *op == BinaryOperator::Concat {
                    DataType::Varchar
                } else {
                    left.return_type().widen(&right.return_type())
                };
                BoundExpr::BinaryOp {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                    return_type,
                }
            }
            Expr::UnaryOp { op, expr } => {
                let bound = self.bind_expression_inner(expr, resolve)?;
                let return_type = match op {
                    UnaryOperator::Negate => bound.return_type(),
                    UnaryOperator::Not => DataType::Bool,
                };
                BoundExpr::UnaryOp {
                    op: *op,
                    expr: Box::new(bound),
                    return_type,
                }
            }
            Expr::Between {
                input,
                lower,
                upper,
                negated,
            } => BoundExpr::Between {
                input: Box::new(self.bind_expression_inner(input, resolve)?),
                lower: Box::new(self.bind_expression_inner(lower, resolve)?),
                upper: Box::new(self.bind_expression_inner(upper, resolve)?),
                negated: *negated,
            },
            Expr::Function { name, args } => {
                let mut bound_args = Vec::with_capacity(args.len());
                for arg in args.iter() {
                    bound_args.push(self.bind_expression_inner(arg, resolve)?);
                }
                let return_type = function_return_type(name, &bound_args)?;
                BoundExpr::Function {
                    name: (*name).to_string(),
                    args: bound_args,
                    return_type,
                }
            }
            Expr::Cast { expr, target } => BoundExpr::Cast {
                expr: Box::new(self.bind_expression_inner(expr, resolve)?),
                target: target.clone(),
            },
            Expr::Default => bail!("DEFAULT is only allowed as an UPDATE assignment value"),
        })
    }
}

fn function_return_type(name: &str, args: &[BoundExpr]) -> Result<DataType> {
    let return_type = match name.to_ascii_lowercase().as_str() {
        "abs" | "coalesce" | "greatest" | "least" => args
            .first()
            .map(|a| a.return_type())
            .unwrap_or(DataType::Null),
        "length" | "strlen" => DataType::BigInt,
        "round" | "floor" | "ceil" | "sqrt" => DataType::Double,
        "lower" | "upper" | "trim" | "concat" | "substr" | "substring" => DataType::Varchar,
        "now" | "current_timestamp" => DataType::Timestamp,
        "current_date" => DataType::Date,
        other => bail!("unknown function '{}'", other),
    };
    Ok(return_type)
}
