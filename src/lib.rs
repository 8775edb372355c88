//! # fieldforge
//!
//! Turns natural-language requests into validated, persisted calculated
//! fields and keeps the semantic view of each scope in step with them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Request (natural language / operator)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [generator]
//! ┌─────────────────────────────────────────────────────────┐
//! │              FieldCandidate (untrusted draft)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [validation: grammar, references, types, probe]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ValidatedField                       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [store: versioned compare-and-set]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Persisted definition                     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic: full rebuild, atomic publish]
//! ┌─────────────────────────────────────────────────────────┐
//! │          SemanticViewDefinition + tool descriptors       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`pipeline::FieldPipeline`] drives one request through every stage.

pub mod catalog;
pub mod config;
pub mod expr;
pub mod generator;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod retry;
pub mod semantic;
pub mod store;
pub mod testing;
pub mod tools;
pub mod validation;
pub mod worker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{CatalogProvider, CatalogSnapshot, SourceRelation, StaticCatalogProvider};
    pub use crate::model::{
        CalculatedFieldDefinition, ColumnDescriptor, DataType, FieldCandidate, FieldStatus, ScopeId,
    };
    pub use crate::pipeline::{
        DeprecationOutcome, FieldPipeline, FieldReader, FieldRequest, PipelineOutcome,
    };
    pub use crate::semantic::{RegenerationEngine, SemanticViewDefinition};
    pub use crate::store::{ConflictKind, FieldStore, SqliteFieldStore};
    pub use crate::tools::{FunctionDescriptor, ToolExporter};
    pub use crate::validation::{ValidationCode, ValidationResult, Validator};
}
