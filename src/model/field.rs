//! Calculated field definitions and their lifecycle.
//!
//! ```text
//! Draft ──validate──▶ Validated ──store write──▶ Persisted ──deprecate──▶ Deprecated
//!   │
//!   └───────────────▶ Rejected (kept for audit, never folded into a view)
//! ```
//!
//! The only way to obtain a [`ValidatedField`] is through the validator, and
//! the store only accepts `ValidatedField`s, so a definition cannot reach
//! `Persisted` without passing validation in the same attempt.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{normalize_name, DataType, ScopeId};

/// Lifecycle status of a calculated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldStatus {
    Draft,
    Validated,
    Rejected,
    Persisted,
    Deprecated,
}

impl FieldStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Validated => "Validated",
            Self::Rejected => "Rejected",
            Self::Persisted => "Persisted",
            Self::Deprecated => "Deprecated",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "Draft" => Some(Self::Draft),
            "Validated" => Some(Self::Validated),
            "Rejected" => Some(Self::Rejected),
            "Persisted" => Some(Self::Persisted),
            "Deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// An illegal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move field '{name}' from {from} to {to}")]
pub struct LifecycleError {
    pub name: String,
    pub from: FieldStatus,
    pub to: FieldStatus,
}

/// A proposed field, as produced by the generator or supplied by an operator.
///
/// Nothing about a candidate is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub name: String,
    pub display_name: String,
    pub expression_text: String,
    /// Type the proposer claims the expression yields.
    pub result_type: Option<DataType>,
}

impl FieldCandidate {
    pub fn new(name: impl Into<String>, expression_text: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            expression_text: expression_text.into(),
            result_type: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_result_type(mut self, result_type: DataType) -> Self {
        self.result_type = Some(result_type);
        self
    }
}

/// A calculated field definition in one of its lifecycle states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatedFieldDefinition {
    pub scope_id: ScopeId,
    /// Normalised (upper-case) name, unique within the scope.
    pub name: String,
    pub display_name: String,
    pub expression_text: String,
    /// Normalised names of the catalog columns the expression reads.
    pub referenced_columns: BTreeSet<String>,
    pub result_type: DataType,
    pub status: FieldStatus,
    pub version: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl CalculatedFieldDefinition {
    /// Create a draft from an untrusted candidate.
    pub fn draft(scope_id: ScopeId, candidate: FieldCandidate, created_by: &str) -> Self {
        let display_name = if candidate.display_name.trim().is_empty() {
            candidate.name.trim().to_string()
        } else {
            candidate.display_name.trim().to_string()
        };

        Self {
            scope_id,
            name: normalize_name(&candidate.name),
            display_name,
            expression_text: candidate.expression_text,
            referenced_columns: BTreeSet::new(),
            result_type: candidate.result_type.unwrap_or(DataType::Variant),
            status: FieldStatus::Draft,
            version: 1,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            last_validated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FieldStatus::Persisted
    }

    /// Move a draft to `Rejected`.
    pub fn reject(&mut self) -> Result<(), LifecycleError> {
        self.transition(FieldStatus::Draft, FieldStatus::Rejected)?;
        self.last_validated_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, from: FieldStatus, to: FieldStatus) -> Result<(), LifecycleError> {
        if self.status != from {
            return Err(LifecycleError {
                name: self.name.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// A definition that passed every validation step in this attempt.
///
/// Constructed only by the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedField(CalculatedFieldDefinition);

impl ValidatedField {
    pub(crate) fn from_draft(
        mut draft: CalculatedFieldDefinition,
        referenced_columns: BTreeSet<String>,
        inferred_type: DataType,
    ) -> Result<Self, LifecycleError> {
        draft.transition(FieldStatus::Draft, FieldStatus::Validated)?;
        draft.referenced_columns = referenced_columns;
        draft.result_type = inferred_type;
        draft.last_validated_at = Some(Utc::now());
        Ok(Self(draft))
    }

    pub fn definition(&self) -> &CalculatedFieldDefinition {
        &self.0
    }

    /// Produce the stored form of this definition at `version`.
    pub(crate) fn into_persisted(self, version: u64) -> CalculatedFieldDefinition {
        let mut def = self.0;
        def.status = FieldStatus::Persisted;
        def.version = version;
        def
    }
}
