//! CatalogProvider trait definition.

use async_trait::async_trait;

use super::types::CatalogSnapshot;
use crate::model::{ColumnDescriptor, ScopeId};
use crate::worker::WorkerError;

/// Errors raised while reading a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown scope: {0}")]
    UnknownScope(ScopeId),

    #[error("catalog worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Source of the columns known to each semantic scope.
///
/// Implementations are read-only from the pipeline's point of view.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Take a consistent snapshot of a scope's catalog.
    async fn snapshot(&self, scope: &ScopeId) -> CatalogResult<CatalogSnapshot>;

    /// Columns of a scope, in catalog order.
    async fn get_columns(&self, scope: &ScopeId) -> CatalogResult<Vec<ColumnDescriptor>> {
        Ok(self.snapshot(scope).await?.columns)
    }
}
