//! The field pipeline.
//!
//! [`FieldPipeline`] is the only component that writes: it owns the path
//! from a request to a persisted field and a republished view.
//! [`FieldReader`] is the capability handed to the orchestration layer; it
//! can generate, preview and read, and has no write path at all.

mod coordinator;
mod outcome;
mod reader;

pub use coordinator::FieldPipeline;
pub use outcome::{
    DeprecationOutcome, FieldRequest, PipelineError, PipelineOutcome, PipelineResult,
};
pub use reader::{FieldReader, Preview};
