//! Catalog column descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::{normalize_name, DataType};

/// A source column known to a scope's catalog.
///
/// Descriptors are immutable once handed out by a catalog provider; identity
/// is the normalised `name` within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub display_name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub synonyms: BTreeSet<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            data_type,
            synonyms: BTreeSet::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms.extend(synonyms.into_iter().map(Into::into));
        self
    }

    /// The key this column is resolved under.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Whether `identifier` names this column (case-insensitive).
    pub fn matches(&self, identifier: &str) -> bool {
        self.name.eq_ignore_ascii_case(identifier.trim())
    }
}
