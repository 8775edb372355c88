//! Semantic views - the derived artifact downstream consumers query.
//!
//! A view is a pure function of two inputs:
//!
//! 1. **Catalog** - base dimensions and measures of the scope
//! 2. **Active fields** - every persisted, non-deprecated calculated field,
//!    read at a single store version
//!
//! Views are rebuilt whole on every regeneration and published by swapping
//! an `Arc`, so a reader holds either the previous or the new view, never a
//! mix. Publication is ordered by the store read version: a regeneration
//! that read older state never replaces a view built from newer state.

pub mod error;
mod regenerate;
mod view;

pub use error::{RegenerationError, RegenerationResult};
pub use regenerate::{RegenerationEngine, RegenerationFailure};
pub use view::{SemanticViewDefinition, ViewCalculatedField, ViewColumn};
