//! Durable, versioned store of calculated field definitions.
//!
//! The store is the only place a definition is ever mutated. Every write is
//! a compare-and-set on the record's version, keyed by `(scope, name)`:
//!
//! ```text
//! stored \ expected │ None                  │ Some(v == stored)  │ Some(v != stored)
//! ──────────────────┼───────────────────────┼────────────────────┼──────────────────
//! absent            │ insert, version 1     │ insert, version 1  │ insert, version 1
//! present           │ NameAlreadyExists     │ update, version+1  │ StaleVersion
//! ```
//!
//! A write that repeats the stored content by the same author is a no-op
//! returning the stored record. Conflicts never change state.

mod hash;
mod sqlite;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CalculatedFieldDefinition, ScopeId, ValidatedField};
use crate::validation::ValidationIssue;

pub use hash::{compute_hash, content_hash, fingerprint};
pub use sqlite::SqliteFieldStore;

/// Errors raised by a field store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: i32, expected: i32 },

    #[error("corrupt record for {scope}/{name}: {reason}")]
    Corrupt {
        scope: String,
        name: String,
        reason: String,
    },

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why a write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A record exists and the caller did not expect one.
    NameAlreadyExists,
    /// The caller's expected version is not the stored version.
    StaleVersion,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameAlreadyExists => f.write_str("NameAlreadyExists"),
            Self::StaleVersion => f.write_str("StaleVersion"),
        }
    }
}

/// Result of [`FieldStore::put_if_absent_or_same_version`].
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The definition is stored. `changed` is false for an idempotent replay.
    Persisted {
        definition: CalculatedFieldDefinition,
        changed: bool,
    },
    /// Nothing was written; `current` is the record that blocked the write.
    Conflict {
        kind: ConflictKind,
        current: Option<CalculatedFieldDefinition>,
    },
}

/// Result of [`FieldStore::deprecate`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeprecateOutcome {
    Deprecated(CalculatedFieldDefinition),
    NotFound,
    Conflict {
        kind: ConflictKind,
        current: CalculatedFieldDefinition,
    },
}

/// Active definitions of a scope, read at one store version.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSnapshot {
    pub scope_id: ScopeId,
    /// Store-wide mutation counter at the time of the read.
    pub read_version: u64,
    /// Persisted, non-deprecated definitions ordered by name.
    pub fields: Vec<CalculatedFieldDefinition>,
}

/// A draft that failed validation, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub id: i64,
    pub scope_id: ScopeId,
    pub name: String,
    pub expression_text: String,
    pub created_by: String,
    pub errors: Vec<ValidationIssue>,
    pub rejected_at: DateTime<Utc>,
}

/// Versioned repository of calculated field definitions.
pub trait FieldStore: Send + Sync {
    /// Write a validated definition under optimistic concurrency.
    ///
    /// `expected_version` is the version the caller last read, or `None` when
    /// creating.
    fn put_if_absent_or_same_version(
        &self,
        field: ValidatedField,
        expected_version: Option<u64>,
    ) -> StoreResult<PutOutcome>;

    /// Persisted, non-deprecated definitions of a scope, ordered by name.
    fn list_active(&self, scope: &ScopeId) -> StoreResult<ActiveSnapshot>;

    /// Soft-delete a definition at `expected_version`.
    fn deprecate(
        &self,
        scope: &ScopeId,
        name: &str,
        expected_version: u64,
    ) -> StoreResult<DeprecateOutcome>;

    /// Current record for a name, whatever its status.
    fn get(&self, scope: &ScopeId, name: &str) -> StoreResult<Option<CalculatedFieldDefinition>>;

    /// Append a rejected draft to the audit log.
    fn record_rejection(
        &self,
        draft: &CalculatedFieldDefinition,
        errors: &[ValidationIssue],
    ) -> StoreResult<()>;

    /// Rejected drafts of a scope, oldest first.
    fn list_rejections(&self, scope: &ScopeId) -> StoreResult<Vec<RejectionRecord>>;

    /// Scopes with at least one stored definition.
    fn scopes(&self) -> StoreResult<Vec<ScopeId>>;
}

/// Run a store call on the blocking thread pool.
///
/// Store calls block on disk I/O and the connection lock; async callers use
/// this so a slow write never stalls a runtime worker.
pub async fn blocking<T, F>(store: &Arc<dyn FieldStore>, call: F) -> StoreResult<T>
where
    F: FnOnce(&dyn FieldStore) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref())).await?
}
