//! The derived semantic view artifact.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSnapshot, SourceRelation};
use crate::model::{CalculatedFieldDefinition, ColumnDescriptor, DataType, ScopeId};

/// A base column as exposed by the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    pub display_name: String,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub synonyms: BTreeSet<String>,
}

impl From<&ColumnDescriptor> for ViewColumn {
    fn from(column: &ColumnDescriptor) -> Self {
        Self {
            name: column.key(),
            display_name: column.display_name.clone(),
            data_type: column.data_type,
            synonyms: column.synonyms.clone(),
        }
    }
}

/// A calculated field folded into the view, with its resolved expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCalculatedField {
    pub name: String,
    pub display_name: String,
    pub expression: String,
    pub data_type: DataType,
    pub referenced_columns: BTreeSet<String>,
    pub version: u64,
}

impl From<&CalculatedFieldDefinition> for ViewCalculatedField {
    fn from(def: &CalculatedFieldDefinition) -> Self {
        Self {
            name: def.name.clone(),
            display_name: def.display_name.clone(),
            expression: def.expression_text.trim().to_string(),
            data_type: def.result_type,
            referenced_columns: def.referenced_columns.clone(),
            version: def.version,
        }
    }
}

/// The semantic view of a scope: base dimensions and measures plus every
/// active calculated field.
///
/// Built whole on every regeneration and never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticViewDefinition {
    pub scope_id: ScopeId,
    /// Highest version among the folded fields, 0 when there are none.
    pub generation_version: u64,
    /// Store read version the field list was taken at.
    pub store_read_version: u64,
    pub catalog_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    pub dimensions: Vec<ViewColumn>,
    pub measures: Vec<ViewColumn>,
    pub calculated_fields: Vec<ViewCalculatedField>,
    pub generated_at: DateTime<Utc>,
}

impl SemanticViewDefinition {
    /// Fold a catalog snapshot with the active fields of its scope.
    ///
    /// Numeric columns become measures, everything else a dimension.
    pub(crate) fn fold(
        catalog: &CatalogSnapshot,
        fields: &[CalculatedFieldDefinition],
        store_read_version: u64,
    ) -> Self {
        let (measures, dimensions): (Vec<_>, Vec<_>) = catalog
            .columns
            .iter()
            .map(ViewColumn::from)
            .partition(|c| c.data_type.is_numeric());

        let calculated_fields: Vec<ViewCalculatedField> =
            fields.iter().map(ViewCalculatedField::from).collect();

        Self {
            scope_id: catalog.scope_id.clone(),
            generation_version: fields.iter().map(|f| f.version).max().unwrap_or(0),
            store_read_version,
            catalog_version: catalog.version,
            relation: catalog.relation.as_ref().map(SourceRelation::to_string),
            dimensions,
            measures,
            calculated_fields,
            generated_at: Utc::now(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&ViewCalculatedField> {
        let name = crate::model::normalize_name(name);
        self.calculated_fields.iter().find(|f| f.name == name)
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Names of the folded calculated fields, in order.
    pub fn field_names(&self) -> Vec<&str> {
        self.calculated_fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
