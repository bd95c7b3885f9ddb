//! # Logical Operators
//!
//! Bound logical operators produced by the planner. Operators form owned
//! trees; child access is by value, and the binder reaches the base-table
//! scan of a subtree through [`LogicalOperator::target_get_mut`] rather than
//! through shared ownership.
//!
//! ## Operator Set
//!
//! - `Get`: base-table scan with a mutable list of projected column ids
//! - `Projection`: expression evaluation, addressed by `table_index`
//! - `Filter`: row selection
//! - `CrossProduct`: the UPDATE ... FROM combination
//! - `Update`: the mutation sink, carrying the assignment lists and the
//!   del+insert rewrite flag
//!
//! Column references between operators use `(table_index, ordinal)` bindings:
//! the ordinal indexes the producing operator's output list.

use crate::schema::TableDef;
use crate::types::{DataType, ScalarValue};
use crate::sql::ast::{BinaryOperator, UnaryOperator};

/// A projected column of a base-table scan: either a physical column or the
/// reserved row-identifier marker appended to scans that feed a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnId {
    Physical(usize),
    RowId,
}

/// Reference to the output of another operator: `(table_index, ordinal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnBinding {
    pub table_index: usize,
    pub ordinal: usize,
}

impl ColumnBinding {
    pub fn new(table_index: usize, ordinal: usize) -> Self {
        Self {
            table_index,
            ordinal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpr {
    ColumnRef {
        binding: ColumnBinding,
        return_type: DataType,
    },
    /// Placeholder bound to the target column's default value at execution.
    Default { return_type: DataType },
    Literal { value: ScalarValue },
    BinaryOp {
        op: BinaryOperator,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
        return_type: DataType,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<BoundExpr>,
        return_type: DataType,
    },
    Between {
        input: Box<BoundExpr>,
        lower: Box<BoundExpr>,
        upper: Box<BoundExpr>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<BoundExpr>,
        return_type: DataType,
    },
    Cast {
        expr: Box<BoundExpr>,
        target: DataType,
    },
}

impl BoundExpr {
    pub fn return_type(&self) -> DataType {
        match self {
            BoundExpr::ColumnRef { return_type, .. } => return_type.clone(),
            BoundExpr::Default { return_type } => return_type.clone(),
            BoundExpr::Literal { value } => value.data_type(),
            BoundExpr::BinaryOp { return_type, .. } => return_type.clone(),
            BoundExpr::UnaryOp { return_type, .. } => return_type.clone(),
            BoundExpr::Between { .. } => DataType::Bool,
            BoundExpr::Function { return_type, .. } => return_type.clone(),
            BoundExpr::Cast { target, .. } => target.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalGet {
    pub table_index: usize,
    pub table_name: String,
    /// Columns this scan produces, in output order. Extended during binding
    /// as expressions and constraint checks demand more columns.
    pub column_ids: Vec<ColumnId>,
}

impl LogicalGet {
    pub fn new(table_index: usize, table_name: impl Into<String>) -> Self {
        Self {
            table_index,
            table_name: table_name.into(),
            column_ids: Vec::new(),
        }
    }

    /// Ordinal of the given column in this scan's output, appending it if it
    /// is not projected yet.
    pub fn project_column(&mut self, id: ColumnId) -> usize {
        match self.column_ids.iter().position(|c| *c == id) {
            Some(ordinal) => ordinal,
            None => {
                self.column_ids.push(id);
                self.column_ids.len() - 1
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalProjection {
    pub table_index: usize,
    pub expressions: Vec<BoundExpr>,
    pub input: Box<LogicalOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalFilter {
    pub predicate: BoundExpr,
    pub input: Box<LogicalOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalCrossProduct {
    pub left: Box<LogicalOperator>,
    pub right: Box<LogicalOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalUpdate {
    pub table_name: String,
    pub table_index: usize,
    /// Physical indices of assigned columns, parallel to `expressions`.
    pub columns: Vec<usize>,
    pub expressions: Vec<BoundExpr>,
    pub return_chunk: bool,
    pub update_is_del_and_insert: bool,
    /// One bound default per table column, in physical order.
    pub bound_defaults: Vec<BoundExpr>,
    pub input: Box<LogicalOperator>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalOperator {
    Get(LogicalGet),
    Projection(LogicalProjection),
    Filter(LogicalFilter),
    CrossProduct(LogicalCrossProduct),
    Update(LogicalUpdate),
}

impl LogicalOperator {
    /// Reach the base-table scan that feeds this subtree: the left-most
    /// `Get` descendant. For an UPDATE plan that is the target table's scan
    /// (child 0 of a cross product when a FROM clause is present).
    pub fn target_get_mut(&mut self) -> Option<&mut LogicalGet> {
        match self {
            LogicalOperator::Get(get) => Some(get),
            LogicalOperator::Projection(proj) => proj.input.target_get_mut(),
            LogicalOperator::Filter(filter) => filter.input.target_get_mut(),
            LogicalOperator::CrossProduct(cross) => cross.left.target_get_mut(),
            LogicalOperator::Update(update) => update.input.target_get_mut(),
        }
    }

    pub fn target_get(&self) -> Option<&LogicalGet> {
        match self {
            LogicalOperator::Get(get) => Some(get),
            LogicalOperator::Projection(proj) => proj.input.target_get(),
            LogicalOperator::Filter(filter) => filter.input.target_get(),
            LogicalOperator::CrossProduct(cross) => cross.left.target_get(),
            LogicalOperator::Update(update) => update.input.target_get(),
        }
    }

    pub fn as_update(&self) -> Option<&LogicalUpdate> {
        match self {
            LogicalOperator::Update(update) => Some(update),
            LogicalOperator::Projection(proj) => proj.input.as_update(),
            _ => None,
        }
    }
}

/// Build a self-assignment (`c = c`) for a column that must be carried
/// through the projection so constraints can see its post-update value.
pub(crate) fn column_ref(binding: ColumnBinding, table: &TableDef, physical: usize) -> BoundExpr {
    BoundExpr::ColumnRef {
        binding,
        return_type: table.column(physical).data_type().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_column_deduplicates() {
        let mut get = LogicalGet::new(0, "t");
        assert_eq!(get.project_column(ColumnId::Physical(3)), 0);
        assert_eq!(get.project_column(ColumnId::Physical(1)), 1);
        assert_eq!(get.project_column(ColumnId::Physical(3)), 0);
        assert_eq!(get.column_ids.len(), 2);
    }

    #[test]
    fn target_get_descends_left() {
        let target = LogicalOperator::Get(LogicalGet::new(0, "t"));
        let from = LogicalOperator::Get(LogicalGet::new(1, "u"));
        let mut cross = LogicalOperator::CrossProduct(LogicalCrossProduct {
            left: Box::new(target),
            right: Box::new(from),
        });
        assert_eq!(cross.target_get_mut().unwrap().table_index, 0);
    }
}
