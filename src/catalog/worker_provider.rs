//! WorkerCatalogProvider implementation.
//!
//! Reads each scope's columns from the live schema through the worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::provider::{CatalogError, CatalogProvider, CatalogResult};
use super::types::{CatalogSnapshot, SourceRelation};
use crate::model::{ColumnDescriptor, DataType, ScopeId};
use crate::store::fingerprint;
use crate::worker::{EngineConnection, WorkerClient};

/// Catalog provider that introspects the engine via the worker.
///
/// Each scope maps to one source relation; its columns become the scope's
/// catalog. The snapshot version is a fingerprint of the column list, so it
/// changes exactly when the live schema does.
pub struct WorkerCatalogProvider {
    client: Arc<WorkerClient>,
    connection: EngineConnection,
    default_schema: Option<String>,
    scopes: BTreeMap<ScopeId, SourceRelation>,
}

impl WorkerCatalogProvider {
    pub fn new(client: Arc<WorkerClient>, connection: EngineConnection) -> Self {
        Self {
            client,
            connection,
            default_schema: None,
            scopes: BTreeMap::new(),
        }
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    /// Map a scope to the relation holding its base columns.
    pub fn with_scope(mut self, scope: ScopeId, relation: SourceRelation) -> Self {
        self.scopes.insert(scope, relation);
        self
    }
}

#[async_trait]
impl CatalogProvider for WorkerCatalogProvider {
    async fn snapshot(&self, scope: &ScopeId) -> CatalogResult<CatalogSnapshot> {
        let relation = self
            .scopes
            .get(scope)
            .ok_or_else(|| CatalogError::UnknownScope(scope.clone()))?;

        let schema = relation
            .schema
            .clone()
            .or_else(|| self.default_schema.clone())
            .unwrap_or_default();

        let response = self
            .client
            .columns(&self.connection, &schema, &relation.table)
            .await?;

        let mut infos = response.columns;
        infos.sort_by_key(|c| c.position);

        let columns: Vec<ColumnDescriptor> = infos
            .into_iter()
            .map(|info| {
                let column = ColumnDescriptor::new(info.name, DataType::from_engine_type(&info.data_type));
                match info.comment.filter(|c| !c.trim().is_empty()) {
                    Some(comment) => column.with_display_name(comment),
                    None => column,
                }
            })
            .collect();

        let version = fingerprint(&columns)
            .map_err(|e| CatalogError::Invalid(format!("cannot fingerprint columns: {e}")))?;
        debug!(%scope, columns = columns.len(), version, "catalog introspected");

        Ok(CatalogSnapshot {
            scope_id: scope.clone(),
            version,
            relation: Some(relation.clone()),
            columns,
        })
    }
}
