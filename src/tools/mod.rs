//! Tool registration export.
//!
//! The orchestration layer discovers what it can call through a
//! [`ToolDescriptorSet`] per scope: one descriptor per operator-registered
//! function, plus the names of the scope's active calculated fields. The
//! field list is refreshed after every successful regeneration.

mod descriptor;
mod exporter;

pub use descriptor::{
    CalculatedFieldSummary, FunctionDescriptor, ToolDescriptor, ToolDescriptorSet, ToolParameter,
};
pub use exporter::{ToolError, ToolExporter};
