//! Catalog snapshot types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Driver;
use crate::model::{ColumnDescriptor, ScopeId};

/// The physical relation a scope's base columns live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRelation {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl SourceRelation {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            table: table.into(),
        }
    }

    /// Parse a dotted `[database.][schema.]table` name.
    pub fn parse(qualified: &str) -> Option<Self> {
        let parts: Vec<&str> = qualified.split('.').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [table] => Some(Self::new(*table)),
            [schema, table] => Some(Self {
                database: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [database, schema, table] => Some(Self {
                database: Some(database.to_string()),
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            _ => None,
        }
    }

    /// Render the relation with each part quoted for `driver`.
    pub fn quoted(&self, driver: Driver) -> String {
        [self.database.as_deref(), self.schema.as_deref(), Some(self.table.as_str())]
            .into_iter()
            .flatten()
            .map(|part| driver.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for SourceRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{}.", db)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        f.write_str(&self.table)
    }
}

/// A versioned, immutable view of one scope's catalog.
///
/// Validation and regeneration take a snapshot as an explicit input, so the
/// same snapshot always yields the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub scope_id: ScopeId,
    /// Changes whenever the scope's column set changes.
    pub version: u64,
    pub relation: Option<SourceRelation>,
    pub columns: Vec<ColumnDescriptor>,
}

impl CatalogSnapshot {
    pub fn new(scope_id: ScopeId, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            scope_id,
            version: 1,
            relation: None,
            columns,
        }
    }

    pub fn with_relation(mut self, relation: SourceRelation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Resolve an identifier to a column (case-insensitive).
    pub fn resolve(&self, identifier: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.matches(identifier))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_some()
    }
}
