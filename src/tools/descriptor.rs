//! Tool descriptor types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::model::{DataType, ScopeId};

/// One parameter of a registered function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A pre-built function or UDF registered by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<ToolParameter>,
    pub output: DataType,
    /// Scopes the function is offered in; empty means every scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeId>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, output: DataType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            output,
            scopes: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.inputs.push(ToolParameter {
            name: name.into(),
            data_type,
            description: None,
        });
        self
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn applies_to(&self, scope: &ScopeId) -> bool {
        self.scopes.is_empty() || self.scopes.contains(scope)
    }
}

/// A callable tool as published to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub inputs: Vec<ToolParameter>,
    pub output: DataType,
    /// JSON Schema of the tool's arguments.
    pub input_schema: Value,
}

impl From<&FunctionDescriptor> for ToolDescriptor {
    fn from(f: &FunctionDescriptor) -> Self {
        let mut properties = Map::new();
        for input in &f.inputs {
            let mut schema = json_schema_for(input.data_type);
            if let (Some(description), Value::Object(map)) = (&input.description, &mut schema) {
                map.insert("description".to_string(), Value::String(description.clone()));
            }
            properties.insert(input.name.clone(), schema);
        }
        let required: Vec<&str> = f.inputs.iter().map(|i| i.name.as_str()).collect();

        Self {
            name: f.name.clone(),
            description: f.description.clone(),
            inputs: f.inputs.clone(),
            output: f.output,
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

fn json_schema_for(data_type: DataType) -> Value {
    match data_type {
        DataType::Number => json!({ "type": "number" }),
        DataType::Varchar => json!({ "type": "string" }),
        DataType::Boolean => json!({ "type": "boolean" }),
        DataType::Date => json!({ "type": "string", "format": "date" }),
        DataType::Timestamp => json!({ "type": "string", "format": "date-time" }),
        DataType::Variant => json!({}),
    }
}

/// An active calculated field, listed for discoverability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatedFieldSummary {
    pub name: String,
    pub display_name: String,
    pub result_type: DataType,
    pub version: u64,
}

/// Everything exported for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptorSet {
    pub scope_id: ScopeId,
    /// Generation of the semantic view the field list was taken from.
    pub generation_version: Option<u64>,
    pub tools: Vec<ToolDescriptor>,
    pub calculated_fields: Vec<CalculatedFieldSummary>,
}
