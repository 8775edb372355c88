//! In-process catalog backed by a TOML file or explicit registration.
//!
//! ```toml
//! [scopes.credit]
//! relation = "ANALYTICS.CREDIT.DIM_CREDIT"
//!
//! [[scopes.credit.columns]]
//! name = "LTM_EBITDA"
//! display_name = "LTM EBITDA"
//! data_type = "NUMBER"
//! synonyms = ["ebitda", "trailing ebitda"]
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use super::provider::{CatalogError, CatalogProvider, CatalogResult};
use super::types::{CatalogSnapshot, SourceRelation};
use crate::model::{ColumnDescriptor, DataType, ScopeId};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    scopes: BTreeMap<String, ScopeEntry>,
}

#[derive(Debug, Deserialize)]
struct ScopeEntry {
    relation: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnEntry>,
}

#[derive(Debug, Deserialize)]
struct ColumnEntry {
    name: String,
    display_name: Option<String>,
    data_type: String,
    #[serde(default)]
    synonyms: BTreeSet<String>,
}

/// Catalog provider holding scopes in memory.
///
/// Every registration of a scope bumps its version.
#[derive(Debug, Default)]
pub struct StaticCatalogProvider {
    scopes: RwLock<BTreeMap<ScopeId, CatalogSnapshot>>,
}

impl StaticCatalogProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a provider from a TOML catalog file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a provider from TOML catalog text.
    pub fn from_toml(content: &str) -> CatalogResult<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let provider = Self::new();

        for (scope, entry) in file.scopes {
            let relation = match entry.relation {
                Some(r) => Some(SourceRelation::parse(&r).ok_or_else(|| {
                    CatalogError::Invalid(format!("scope '{scope}': bad relation '{r}'"))
                })?),
                None => None,
            };

            let columns = entry
                .columns
                .into_iter()
                .map(|c| {
                    let data_type = DataType::from_str(&c.data_type).ok_or_else(|| {
                        CatalogError::Invalid(format!(
                            "scope '{scope}': column '{}' has unknown type '{}'",
                            c.name, c.data_type
                        ))
                    })?;
                    let mut column = ColumnDescriptor::new(c.name, data_type)
                        .with_synonyms(c.synonyms);
                    if let Some(display) = c.display_name {
                        column = column.with_display_name(display);
                    }
                    Ok::<_, CatalogError>(column)
                })
                .collect::<CatalogResult<Vec<_>>>()?;

            provider.register(ScopeId::new(scope), relation, columns)?;
        }

        Ok(provider)
    }

    /// Register or replace a scope.
    ///
    /// Column names must be unique within the scope (case-insensitive).
    pub fn register(
        &self,
        scope: ScopeId,
        relation: Option<SourceRelation>,
        columns: Vec<ColumnDescriptor>,
    ) -> CatalogResult<u64> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.key()) {
                return Err(CatalogError::Invalid(format!(
                    "scope '{scope}': duplicate column '{}'",
                    column.name
                )));
            }
        }

        let mut scopes = self.scopes.write();
        let version = scopes.get(&scope).map_or(1, |s| s.version + 1);
        scopes.insert(
            scope.clone(),
            CatalogSnapshot {
                scope_id: scope,
                version,
                relation,
                columns,
            },
        );
        Ok(version)
    }

    pub fn scopes(&self) -> Vec<ScopeId> {
        self.scopes.read().keys().cloned().collect()
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalogProvider {
    async fn snapshot(&self, scope: &ScopeId) -> CatalogResult<CatalogSnapshot> {
        self.scopes
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownScope(scope.clone()))
    }
}
