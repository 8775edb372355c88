//! Pipeline requests, outcomes and errors.

use std::sync::Arc;

use crate::catalog::CatalogError;
use crate::generator::GenerationError;
use crate::model::{CalculatedFieldDefinition, LifecycleError, ScopeId};
use crate::semantic::SemanticViewDefinition;
use crate::store::{ConflictKind, StoreError};
use crate::validation::ValidationResult;

/// A natural-language request for a new or replacement field.
#[derive(Debug, Clone)]
pub struct FieldRequest {
    pub scope: ScopeId,
    pub request: String,
    pub created_by: String,
    /// Version last read by the caller when replacing an existing field.
    pub expected_version: Option<u64>,
}

impl FieldRequest {
    pub fn new(scope: ScopeId, request: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            scope,
            request: request.into(),
            created_by: created_by.into(),
            expected_version: None,
        }
    }

    pub fn replacing(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// What happened to a create or submit request.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The field is persisted.
    ///
    /// `published` says whether the view returned includes the write. When
    /// regeneration failed the write stands and `view` is the previous one.
    Created {
        definition: CalculatedFieldDefinition,
        changed: bool,
        view: Option<Arc<SemanticViewDefinition>>,
        published: bool,
    },
    /// Validation failed; nothing was written besides the audit record.
    Rejected {
        definition: CalculatedFieldDefinition,
        result: ValidationResult,
    },
    GenerationFailed(GenerationError),
    Conflict {
        kind: ConflictKind,
        current: Option<CalculatedFieldDefinition>,
    },
    /// Cancelled before the store write. Nothing changed.
    Cancelled,
}

impl PipelineOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    pub fn definition(&self) -> Option<&CalculatedFieldDefinition> {
        match self {
            Self::Created { definition, .. } | Self::Rejected { definition, .. } => Some(definition),
            _ => None,
        }
    }
}

/// What happened to a deprecation request.
#[derive(Debug)]
pub enum DeprecationOutcome {
    Deprecated {
        definition: CalculatedFieldDefinition,
        view: Option<Arc<SemanticViewDefinition>>,
        published: bool,
    },
    NotFound,
    Conflict {
        kind: ConflictKind,
        current: CalculatedFieldDefinition,
    },
    Cancelled,
}

/// Infrastructure failures. Expected outcomes are [`PipelineOutcome`]s.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("no generator is configured")]
    GeneratorNotConfigured,
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Catalog(CatalogError::Worker(e)) => e.is_retriable(),
            Self::Store(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
            }
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
