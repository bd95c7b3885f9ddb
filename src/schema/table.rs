//! # Table Definitions
//!
//! Schema metadata for tables, columns, CHECK constraints, and indexes.
//!
//! ## Overview
//!
//! - **Columns**: typed fields, optionally generated from an expression or
//!   carrying a default value. Generated columns cannot be assigned in an
//!   UPDATE.
//! - **CHECK constraints**: carry the set of physical column indices their
//!   expression references. The UPDATE binder uses this set to decide which
//!   extra columns must be projected so the constraint can be re-evaluated
//!   on the post-update row image.
//! - **Indexes**: ordered lists of physical column indices. An UPDATE that
//!   touches any index key column is rewritten into a delete plus insert.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pikedb::schema::{CheckConstraint, ColumnDef, IndexDef, TableDef};
//! use pikedb::types::DataType;
//!
//! let table = TableDef::new(
//!     "accounts",
//!     vec![
//!         ColumnDef::new("id", DataType::BigInt),
//!         ColumnDef::new("balance", DataType::Double),
//!         ColumnDef::new("credit", DataType::Double),
//!     ],
//! )
//! .with_check(CheckConstraint::new("balance + credit >= 0", [1, 2]))
//! .with_index(IndexDef::new("accounts_pk", [0], true));
//! ```

use crate::types::DataType;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    default_value: Option<String>,
    generated: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default_value: None,
            generated: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    /// Mark this column as generated from the given expression text.
    pub fn with_generated(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(expression.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

/// A CHECK constraint together with the physical column indices its
/// expression references.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConstraint {
    expression: String,
    bound_columns: SmallVec<[usize; 4]>,
}

impl CheckConstraint {
    pub fn new(
        expression: impl Into<String>,
        bound_columns: impl IntoIterator<Item = usize>,
    ) -> Self {
        Self {
            expression: expression.into(),
            bound_columns: bound_columns.into_iter().collect(),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn bound_columns(&self) -> &[usize] {
        &self.bound_columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    name: String,
    columns: SmallVec<[usize; 4]>,
    unique: bool,
}

impl IndexDef {
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = usize>,
        unique: bool,
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().collect(),
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether an UPDATE assigning the given physical columns touches this
    /// index's key.
    pub fn is_updated(&self, updated_columns: &[usize]) -> bool {
        self.columns
            .iter()
            .any(|key| updated_columns.contains(key))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
    checks: Vec<CheckConstraint>,
    indexes: Vec<IndexDef>,
    temporary: bool,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            checks: Vec::new(),
            indexes: Vec::new(),
            temporary: false,
        }
    }

    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, physical_index: usize) -> &ColumnDef {
        &self.columns[physical_index]
    }

    /// Case-insensitive lookup of a column's physical index.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(name))
    }

    pub fn checks(&self) -> &[CheckConstraint] {
        &self.checks
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableDef {
        TableDef::new(
            "t",
            vec![
                ColumnDef::new("i", DataType::BigInt),
                ColumnDef::new("j", DataType::BigInt),
                ColumnDef::new("name", DataType::Varchar),
            ],
        )
        .with_check(CheckConstraint::new("i + j < 10", [0, 1]))
        .with_index(IndexDef::new("t_j_name", [1, 2], false))
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let table = sample_table();
        assert_eq!(table.column_index("NAME"), Some(2));
        assert_eq!(table.column_index("missing"), None);
    }

    #[test]
    fn index_touch_detection() {
        let table = sample_table();
        let index = &table.indexes()[0];
        assert!(index.is_updated(&[1]));
        assert!(index.is_updated(&[0, 2]));
        assert!(!index.is_updated(&[0]));
    }

    #[test]
    fn check_constraint_exposes_bound_columns() {
        let table = sample_table();
        assert_eq!(table.checks()[0].bound_columns(), &[0, 1]);
    }
}
