//! # Catalog
//!
//! Name resolution for tables and views. The planner resolves UPDATE targets
//! through the catalog; only base tables are valid targets, so views are kept
//! as distinct entries to make the rejection testable.

use crate::schema::table::TableDef;
use eyre::{bail, Result};
use hashbrown::HashMap;

#[derive(Debug, Clone)]
pub enum CatalogEntry {
    Table(TableDef),
    View { name: String, definition: String },
}

impl CatalogEntry {
    pub fn name(&self) -> &str {
        match self {
            CatalogEntry::Table(table) => table.name(),
            CatalogEntry::View { name, .. } => name,
        }
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: TableDef) {
        self.entries
            .insert(table.name().to_ascii_lowercase(), CatalogEntry::Table(table));
    }

    pub fn register_view(&mut self, name: impl Into<String>, definition: impl Into<String>) {
        let name = name.into();
        self.entries.insert(
            name.to_ascii_lowercase(),
            CatalogEntry::View {
                name,
                definition: definition.into(),
            },
        );
    }

    pub fn resolve(&self, name: &str) -> Result<&CatalogEntry> {
        match self.entries.get(&name.to_ascii_lowercase()) {
            Some(entry) => Ok(entry),
            None => bail!("table '{}' does not exist", name),
        }
    }

    pub fn resolve_table(&self, name: &str) -> Result<&TableDef> {
        match self.resolve(name)? {
            CatalogEntry::Table(table) => Ok(table),
            CatalogEntry::View { .. } => bail!("can only update base table, '{}' is a view", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::table::ColumnDef;
    use crate::types::DataType;

    #[test]
    fn resolve_is_case_insensitive() {
        let mut catalog = Catalog::new();
        catalog.register_table(TableDef::new(
            "Users",
            vec![ColumnDef::new("id", DataType::BigInt)],
        ));
        assert!(catalog.resolve_table("users").is_ok());
        assert!(catalog.resolve_table("USERS").is_ok());
    }

    #[test]
    fn views_are_not_updatable() {
        let mut catalog = Catalog::new();
        catalog.register_view("v", "SELECT 1");
        let err = catalog.resolve_table("v").unwrap_err();
        assert!(err.to_string().contains("can only update base table"));
    }

    #[test]
    fn missing_table_errors() {
        let catalog = Catalog::new();
        assert!(catalog.resolve_table("nope").is_err());
    }
}
