//! The tool registration exporter.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info};

use super::descriptor::{CalculatedFieldSummary, FunctionDescriptor, ToolDescriptor, ToolDescriptorSet};
use crate::model::{normalize_name, ScopeId};
use crate::semantic::SemanticViewDefinition;

static TOOL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.$]{0,127}$").expect("tool name pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool name '{0}'")]
    InvalidName(String),

    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("tool '{tool}' declares parameter '{parameter}' twice")]
    DuplicateParameter { tool: String, parameter: String },
}

#[derive(Debug, Clone)]
struct PublishedFields {
    generation_version: u64,
    store_read_version: u64,
    fields: Vec<CalculatedFieldSummary>,
}

/// Publishes operator-registered functions plus the names of active
/// calculated fields.
///
/// Calculated fields are never callable tools: they are listed so the
/// orchestration layer knows they exist, and consumed through the view.
#[derive(Debug, Default)]
pub struct ToolExporter {
    functions: RwLock<BTreeMap<String, FunctionDescriptor>>,
    fields: DashMap<ScopeId, PublishedFields>,
}

impl ToolExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an exporter from configured functions.
    pub fn from_functions(functions: impl IntoIterator<Item = FunctionDescriptor>) -> Result<Self, ToolError> {
        let exporter = Self::new();
        for function in functions {
            exporter.register_function(function)?;
        }
        Ok(exporter)
    }

    /// Register a pre-built function. Names are unique, case-insensitively.
    pub fn register_function(&self, function: FunctionDescriptor) -> Result<(), ToolError> {
        if !TOOL_NAME.is_match(&function.name) {
            return Err(ToolError::InvalidName(function.name));
        }
        let mut seen = std::collections::HashSet::new();
        for input in &function.inputs {
            if !seen.insert(input.name.to_ascii_lowercase()) {
                return Err(ToolError::DuplicateParameter {
                    tool: function.name.clone(),
                    parameter: input.name.clone(),
                });
            }
        }

        let key = normalize_name(&function.name);
        let mut functions = self.functions.write();
        if functions.contains_key(&key) {
            return Err(ToolError::Duplicate(function.name));
        }
        info!(tool = %function.name, "function registered");
        functions.insert(key, function);
        Ok(())
    }

    /// Remove a registered function. Returns whether it existed.
    pub fn unregister_function(&self, name: &str) -> bool {
        self.functions.write().remove(&normalize_name(name)).is_some()
    }

    /// Take the calculated field list from a newly published view.
    ///
    /// A view built from an older store read than the one already exported
    /// is ignored. Returns whether the export changed.
    pub fn refresh(&self, view: &SemanticViewDefinition) -> bool {
        let fields = view
            .calculated_fields
            .iter()
            .map(|f| CalculatedFieldSummary {
                name: f.name.clone(),
                display_name: f.display_name.clone(),
                result_type: f.data_type,
                version: f.version,
            })
            .collect::<Vec<_>>();

        let published = PublishedFields {
            generation_version: view.generation_version,
            store_read_version: view.store_read_version,
            fields,
        };

        match self.fields.entry(view.scope_id.clone()) {
            Entry::Occupied(mut current) => {
                if current.get().store_read_version > view.store_read_version {
                    debug!(scope = %view.scope_id, store_read_version = view.store_read_version, exported = current.get().store_read_version, "stale view ignored by tool export");
                    return false;
                }
                current.insert(published);
            }
            Entry::Vacant(slot) => {
                slot.insert(published);
            }
        }
        debug!(scope = %view.scope_id, generation = view.generation_version, store_read_version = view.store_read_version, "tool export refreshed");
        true
    }

    /// The descriptor set for a scope.
    pub fn export(&self, scope: &ScopeId) -> ToolDescriptorSet {
        let tools = self
            .functions
            .read()
            .values()
            .filter(|f| f.applies_to(scope))
            .map(ToolDescriptor::from)
            .collect();

        let (generation_version, calculated_fields) = match self.fields.get(scope) {
            Some(published) => (Some(published.generation_version), published.fields.clone()),
            None => (None, Vec::new()),
        };

        ToolDescriptorSet {
            scope_id: scope.clone(),
            generation_version,
            tools,
            calculated_fields,
        }
    }
}
