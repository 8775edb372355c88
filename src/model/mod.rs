//! Domain types: scopes, catalog columns and calculated field definitions.

mod column;
mod field;
mod types;

pub use column::ColumnDescriptor;
pub use field::{
    CalculatedFieldDefinition, FieldCandidate, FieldStatus, LifecycleError, ValidatedField,
};
pub use types::{normalize_name, DataType, ScopeId};
