//! Regeneration errors.

use crate::catalog::CatalogError;
use crate::probe::ProbeError;
use crate::retry::Transient;
use crate::store::StoreError;

/// Why a regeneration attempt did not publish.
#[derive(Debug, thiserror::Error)]
pub enum RegenerationError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("calculated field(s) {} shadow base columns", fields.join(", "))]
    NameCollisionWithBaseColumn { fields: Vec<String> },

    #[error("field '{field}' references column '{column}', which the catalog no longer has")]
    DanglingReference { field: String, column: String },

    #[error("engine rejected the merged view: {message}")]
    EngineRejected { message: String },

    #[error("merged view probe failed: {0}")]
    Probe(#[from] ProbeError),
}

impl RegenerationError {
    /// Stable code for logs and failure records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Catalog(_) => "CatalogUnavailable",
            Self::Store(_) => "StoreUnavailable",
            Self::NameCollisionWithBaseColumn { .. } => "NameCollisionWithBaseColumn",
            Self::DanglingReference { .. } => "DanglingReference",
            Self::EngineRejected { .. } => "EngineRejected",
            Self::Probe(ProbeError::Unsafe(_)) => "UnsafeProbe",
            Self::Probe(_) => "EngineUnavailable",
        }
    }

    /// Whether rerunning the same regeneration could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Catalog(CatalogError::Worker(e)) => e.is_retriable(),
            Self::Probe(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type RegenerationResult<T> = Result<T, RegenerationError>;
